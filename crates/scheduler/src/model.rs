use std::time::{Duration, Instant};

use appsearch_core_types::UserHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;

/// Unit of work run on a user's executor.
pub type Task = Box<dyn FnOnce(TaskContext) + Send + 'static>;

#[derive(Clone, Debug)]
pub struct DispatchTimeline {
    pub enqueued_at: Instant,
    pub started_at: Option<Instant>,
}

impl Default for DispatchTimeline {
    fn default() -> Self {
        Self {
            enqueued_at: Instant::now(),
            started_at: None,
        }
    }
}

impl DispatchTimeline {
    pub fn mark_started(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Time spent waiting in the queue; zero until the task has started.
    pub fn queue_wait(&self) -> Duration {
        self.started_at
            .and_then(|started| started.checked_duration_since(self.enqueued_at))
            .unwrap_or_default()
    }
}

/// Handed to every task when it starts running.
///
/// A task must poll [`TaskContext::is_cancelled`] at safe points. Tasks still
/// queued when their executor shuts down run once more with a cancelled
/// context so they can answer their caller.
#[derive(Debug)]
pub struct TaskContext {
    user: UserHandle,
    label: &'static str,
    shutdown: CancellationToken,
    caller: Option<CancellationToken>,
    timeline: DispatchTimeline,
}

impl TaskContext {
    pub(crate) fn new(
        user: UserHandle,
        label: &'static str,
        shutdown: CancellationToken,
        caller: Option<CancellationToken>,
        timeline: DispatchTimeline,
    ) -> Self {
        Self {
            user,
            label,
            shutdown,
            caller,
            timeline,
        }
    }

    pub fn user(&self) -> UserHandle {
        self.user
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn timeline(&self) -> &DispatchTimeline {
        &self.timeline
    }

    /// Whether the executor is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Shutdown of the executor or disconnect of the caller.
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
            || self
                .caller
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
    }

    pub fn ensure_active(&self) -> Result<(), SchedulerError> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::Stopped(self.user));
        }
        if self.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }
        Ok(())
    }
}
