use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use appsearch_core_types::UserHandle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::SchedulerError;
use crate::metrics;
use crate::model::{DispatchTimeline, Task, TaskContext};

pub(crate) struct QueuedTask {
    pub(crate) label: &'static str,
    pub(crate) caller: Option<CancellationToken>,
    pub(crate) task: Task,
}

struct Envelope {
    queued: QueuedTask,
    timeline: DispatchTimeline,
}

/// Serial FIFO executor owned by one user.
///
/// Backed by a dedicated thread draining a bounded queue; submission never
/// blocks. Closing the executor cancels its token, lets the thread drain what
/// is already queued with a cancelled context, and joins it.
pub struct UserExecutor {
    user: UserHandle,
    capacity: usize,
    sender: Option<mpsc::Sender<Envelope>>,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl UserExecutor {
    pub fn spawn(user: UserHandle, capacity: usize) -> Result<Self, SchedulerError> {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();
        let worker_token = shutdown.clone();
        let worker = thread::Builder::new()
            .name(format!("appsearch-user-{}", user.id()))
            .spawn(move || run_worker(user, receiver, worker_token))
            .map_err(|err| SchedulerError::Internal(format!("spawn executor for {user}: {err}")))?;
        debug!(%user, capacity, "user executor started");
        Ok(Self {
            user,
            capacity,
            sender: Some(sender),
            shutdown,
            worker: Some(worker),
        })
    }

    pub fn user(&self) -> UserHandle {
        self.user
    }

    pub(crate) fn try_submit(&self, queued: QueuedTask) -> Result<(), SchedulerError> {
        let Some(sender) = self.sender.as_ref() else {
            metrics::record_rejected_stopped();
            return Err(SchedulerError::Stopped(self.user));
        };
        let envelope = Envelope {
            queued,
            timeline: DispatchTimeline::default(),
        };
        match sender.try_send(envelope) {
            Ok(()) => {
                metrics::record_submitted();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                metrics::record_saturated();
                warn!(user = %self.user, capacity = self.capacity, "user executor saturated");
                Err(SchedulerError::Saturated {
                    user: self.user,
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                metrics::record_rejected_stopped();
                Err(SchedulerError::Stopped(self.user))
            }
        }
    }

    /// Tasks waiting in the queue, not counting the one running.
    pub fn queued(&self) -> usize {
        self.sender
            .as_ref()
            .map(|sender| sender.max_capacity() - sender.capacity())
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }

    pub fn close(&mut self) {
        self.shutdown.cancel();
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                // Closed from one of its own tasks; the thread exits once the
                // current task returns and the queue drains.
                return;
            }
            if worker.join().is_err() {
                error!(user = %self.user, "user executor thread panicked during shutdown");
            }
            debug!(user = %self.user, "user executor stopped");
        }
    }
}

impl Drop for UserExecutor {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker(
    user: UserHandle,
    mut receiver: mpsc::Receiver<Envelope>,
    shutdown: CancellationToken,
) {
    while let Some(envelope) = receiver.blocking_recv() {
        let Envelope {
            queued,
            mut timeline,
        } = envelope;
        let QueuedTask {
            label,
            caller,
            task,
        } = queued;
        timeline.mark_started();
        let context = TaskContext::new(user, label, shutdown.clone(), caller, timeline);
        if context.is_cancelled() {
            metrics::record_cancelled();
        } else {
            metrics::record_started();
        }
        match panic::catch_unwind(AssertUnwindSafe(move || task(context))) {
            Ok(()) => metrics::record_completed(),
            Err(_) => {
                metrics::record_panicked();
                error!(%user, label, "user executor task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::sync::{Arc, Mutex};

    fn queued(label: &'static str, task: impl FnOnce(TaskContext) + Send + 'static) -> QueuedTask {
        QueuedTask {
            label,
            caller: None,
            task: Box::new(task),
        }
    }

    #[test]
    fn runs_tasks_in_submission_order() {
        let executor = UserExecutor::spawn(UserHandle::of(10), 64).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..32 {
            let seen = Arc::clone(&seen);
            executor
                .try_submit(queued("order", move |_| seen.lock().unwrap().push(i)))
                .unwrap();
        }
        let (done_tx, done_rx) = std_mpsc::channel();
        executor
            .try_submit(queued("done", move |_| done_tx.send(()).unwrap()))
            .unwrap();
        done_rx.recv().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_task_does_not_kill_the_worker() {
        let executor = UserExecutor::spawn(UserHandle::of(11), 4).unwrap();
        executor
            .try_submit(queued("boom", |_| panic!("task failure")))
            .unwrap();
        let (done_tx, done_rx) = std_mpsc::channel();
        executor
            .try_submit(queued("after", move |ctx| {
                done_tx.send(ctx.label()).unwrap();
            }))
            .unwrap();
        assert_eq!(done_rx.recv().unwrap(), "after");
    }

    #[test]
    fn close_rejects_later_submissions() {
        let mut executor = UserExecutor::spawn(UserHandle::of(12), 4).unwrap();
        executor.close();
        assert!(executor.is_closed());
        let err = executor.try_submit(queued("late", |_| {})).unwrap_err();
        assert_eq!(err, SchedulerError::Stopped(UserHandle::of(12)));
    }

    #[test]
    fn caller_cancellation_is_visible_to_the_task() {
        let executor = UserExecutor::spawn(UserHandle::of(13), 4).unwrap();
        let caller = CancellationToken::new();
        caller.cancel();
        let (tx, rx) = std_mpsc::channel();
        executor
            .try_submit(QueuedTask {
                label: "disconnected",
                caller: Some(caller),
                task: Box::new(move |ctx| {
                    tx.send((ctx.is_cancelled(), ctx.is_shutting_down(), ctx.ensure_active()))
                        .unwrap();
                }),
            })
            .unwrap();
        let (cancelled, shutting_down, active) = rx.recv().unwrap();
        assert!(cancelled);
        assert!(!shutting_down);
        assert_eq!(active, Err(SchedulerError::Cancelled));
    }
}
