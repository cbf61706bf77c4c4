use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use appsearch_core_types::{AppSearchResult, CallId, CallType, UserHandle};
use appsearch_registry::{
    Document, GetSchemaResponse, SearchHit, SetSchemaResponse, StorageInfo,
};
use appsearch_scheduler::DispatchTimeline;
use appsearch_state_center::CallStats;

use crate::batch::BatchResult;

/// Number of items a call succeeded and failed on, for its stats record.
pub trait OperationCounts {
    fn operation_counts(&self) -> (u32, u32) {
        (1, 0)
    }
}

impl OperationCounts for () {}
impl OperationCounts for SetSchemaResponse {}
impl OperationCounts for GetSchemaResponse {}
impl OperationCounts for StorageInfo {}
impl OperationCounts for Document {}
impl OperationCounts for usize {}

impl OperationCounts for Vec<String> {
    fn operation_counts(&self) -> (u32, u32) {
        (self.len() as u32, 0)
    }
}

impl OperationCounts for Vec<SearchHit> {
    fn operation_counts(&self) -> (u32, u32) {
        (self.len() as u32, 0)
    }
}

impl<K: Ord, V> OperationCounts for BatchResult<K, V> {
    fn operation_counts(&self) -> (u32, u32) {
        (self.successes.len() as u32, self.failures.len() as u32)
    }
}

impl<K: Ord, V> OperationCounts for BTreeMap<K, V> {
    fn operation_counts(&self) -> (u32, u32) {
        (self.len() as u32, 0)
    }
}

/// Times one call from the moment it reaches the gate until it is answered.
///
/// Admission ends at [`CallTimer::admitted`]; queueing and execution come
/// from the executor's dispatch timeline.
#[derive(Clone, Debug)]
pub struct CallTimer {
    call_id: CallId,
    call_type: CallType,
    package_name: String,
    database: Option<String>,
    user: UserHandle,
    received_at: Instant,
    admission: Option<Duration>,
    queue_wait: Duration,
    execution_started: Option<Instant>,
}

impl CallTimer {
    pub fn start(
        call_type: CallType,
        package_name: &str,
        database: Option<&str>,
        user: UserHandle,
    ) -> Self {
        Self {
            call_id: CallId::new(),
            call_type,
            package_name: package_name.to_string(),
            database: database.map(str::to_string),
            user,
            received_at: Instant::now(),
            admission: None,
            queue_wait: Duration::ZERO,
            execution_started: None,
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// The call now targets `user`, after resolution or enterprise redirection.
    pub fn retarget(&mut self, user: UserHandle) {
        self.user = user;
    }

    pub fn admitted(&mut self) {
        self.admission = Some(self.received_at.elapsed());
    }

    pub fn started(&mut self, timeline: &DispatchTimeline) {
        self.queue_wait = timeline.queue_wait();
        self.execution_started = Some(Instant::now());
    }

    pub fn finish<T: OperationCounts>(self, result: &AppSearchResult<T>) -> CallStats {
        let admission = self.admission.unwrap_or_else(|| self.received_at.elapsed());
        let execution = self
            .execution_started
            .map(|started| started.elapsed())
            .unwrap_or_default();
        let stats = CallStats::new(&self.call_id, self.call_type, &self.package_name, self.user)
            .with_database(self.database.as_deref())
            .with_latencies(admission, self.queue_wait, execution);
        match result {
            Ok(value) => {
                let (succeeded, failed) = value.operation_counts();
                stats.with_operation_counts(succeeded, failed)
            }
            Err(err) => stats.with_error(err).with_operation_counts(0, 1),
        }
    }
}
