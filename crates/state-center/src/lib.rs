use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use appsearch_core_types::{AppSearchError, CallId, CallType, ResultCode, UserHandle};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::to_writer_pretty;

/// One finished (or rejected) call.
#[derive(Clone, Debug, Serialize)]
pub struct CallStats {
    pub call_id: String,
    pub call_type: CallType,
    pub package_name: String,
    pub database: Option<String>,
    pub user: i32,
    pub result_code: ResultCode,
    pub error_kind: Option<&'static str>,
    pub admission_latency_ms: u64,
    pub queue_wait_ms: u64,
    pub execution_ms: u64,
    pub total_latency_ms: u64,
    pub num_operations_succeeded: u32,
    pub num_operations_failed: u32,
    pub recorded_at_ms: u128,
}

impl CallStats {
    pub fn new(
        call_id: &CallId,
        call_type: CallType,
        package_name: impl Into<String>,
        user: UserHandle,
    ) -> Self {
        Self {
            call_id: call_id.to_string(),
            call_type,
            package_name: package_name.into(),
            database: None,
            user: user.id(),
            result_code: AppSearchError::RESULT_OK,
            error_kind: None,
            admission_latency_ms: 0,
            queue_wait_ms: 0,
            execution_ms: 0,
            total_latency_ms: 0,
            num_operations_succeeded: 0,
            num_operations_failed: 0,
            recorded_at_ms: timestamp_ms(SystemTime::now()),
        }
    }

    pub fn with_database(mut self, database: Option<&str>) -> Self {
        self.database = database.map(str::to_string);
        self
    }

    pub fn with_error(mut self, error: &AppSearchError) -> Self {
        self.result_code = error.result_code();
        self.error_kind = Some(error.kind());
        self
    }

    pub fn with_latencies(
        mut self,
        admission: Duration,
        queue_wait: Duration,
        execution: Duration,
    ) -> Self {
        self.admission_latency_ms = admission.as_millis() as u64;
        self.queue_wait_ms = queue_wait.as_millis() as u64;
        self.execution_ms = execution.as_millis() as u64;
        self.total_latency_ms = (admission + queue_wait + execution).as_millis() as u64;
        self
    }

    pub fn with_operation_counts(mut self, succeeded: u32, failed: u32) -> Self {
        self.num_operations_succeeded = succeeded;
        self.num_operations_failed = failed;
        self
    }

    pub fn is_success(&self) -> bool {
        self.result_code == AppSearchError::RESULT_OK
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CallStatsSummary {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub by_call_type: BTreeMap<&'static str, u64>,
    pub by_error_kind: BTreeMap<&'static str, u64>,
}

#[derive(Debug)]
struct BoundedRing<T> {
    capacity: usize,
    data: VecDeque<T>,
}

impl<T> BoundedRing<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            data: VecDeque::new(),
        }
    }
}

impl<T: Clone> BoundedRing<T> {
    fn push(&mut self, item: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    fn snapshot(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }

    fn clear(&mut self) {
        self.data.clear();
    }
}

/// Receives call statistics. Called from executor threads, never async.
pub trait StatsSink: Send + Sync {
    fn record(&self, stats: CallStats);
}

/// Recent calls of one user, plus running totals.
pub struct CallStatsLogger {
    recent: Mutex<BoundedRing<CallStats>>,
    summary: Mutex<CallStatsSummary>,
}

impl CallStatsLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: Mutex::new(BoundedRing::new(capacity)),
            summary: Mutex::new(CallStatsSummary::default()),
        }
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<CallStats> {
        self.recent.lock().snapshot()
    }

    pub fn summary(&self) -> CallStatsSummary {
        self.summary.lock().clone()
    }

    pub fn clear(&self) {
        self.recent.lock().clear();
        *self.summary.lock() = CallStatsSummary::default();
    }

    pub fn write_snapshot<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let snapshot = StatsSnapshot {
            summary: self.summary(),
            recent: self.recent(),
        };
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &snapshot)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        writer.flush()?;
        Ok(())
    }
}

impl StatsSink for CallStatsLogger {
    fn record(&self, stats: CallStats) {
        {
            let mut summary = self.summary.lock();
            summary.total_calls += 1;
            *summary
                .by_call_type
                .entry(stats.call_type.as_str())
                .or_default() += 1;
            if let Some(kind) = stats.error_kind {
                summary.failed_calls += 1;
                *summary.by_error_kind.entry(kind).or_default() += 1;
            }
        }
        self.recent.lock().push(stats);
    }
}

impl<S: StatsSink + ?Sized> StatsSink for Arc<S> {
    fn record(&self, stats: CallStats) {
        (**self).record(stats)
    }
}

/// Discards everything.
pub struct NoopStatsSink;

impl NoopStatsSink {
    pub fn new() -> Arc<dyn StatsSink> {
        Arc::new(Self)
    }
}

impl StatsSink for NoopStatsSink {
    fn record(&self, _stats: CallStats) {}
}

#[derive(Serialize)]
struct StatsSnapshot {
    summary: CallStatsSummary,
    recent: Vec<CallStats>,
}

fn timestamp_ms(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis())
        .unwrap_or(0)
}
