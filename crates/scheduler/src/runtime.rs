use std::collections::HashMap;

use appsearch_core_types::UserHandle;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SchedulerError;
use crate::executor::{QueuedTask, UserExecutor};
use crate::metrics;
use crate::model::TaskContext;

enum ExecutorSlot {
    Running(UserExecutor),
    /// Torn down; rejects work until the user is opened again.
    Stopped,
}

/// One serial executor per user.
///
/// Submission and teardown take the same lock, so once [`ExecutorPool::shutdown`]
/// has marked a user stopped no later submission for that user can succeed.
/// The worker threads are joined outside the lock.
pub struct ExecutorPool {
    slots: Mutex<HashMap<UserHandle, ExecutorSlot>>,
    queue_capacity: usize,
}

impl ExecutorPool {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Starts the user's executor with the pool's default queue capacity.
    pub fn open(&self, user: UserHandle) -> Result<(), SchedulerError> {
        self.open_with_capacity(user, self.queue_capacity)
    }

    /// Starts the user's executor, replacing a stopped marker. An executor
    /// that is already running keeps its queue.
    pub fn open_with_capacity(
        &self,
        user: UserHandle,
        queue_capacity: usize,
    ) -> Result<(), SchedulerError> {
        let mut slots = self.slots.lock();
        if matches!(slots.get(&user), Some(ExecutorSlot::Running(_))) {
            return Ok(());
        }
        let capacity = queue_capacity.max(1);
        let executor = UserExecutor::spawn(user, capacity)?;
        slots.insert(user, ExecutorSlot::Running(executor));
        info!(%user, capacity, "user executor opened");
        Ok(())
    }

    pub fn submit<F>(
        &self,
        user: UserHandle,
        label: &'static str,
        task: F,
    ) -> Result<(), SchedulerError>
    where
        F: FnOnce(TaskContext) + Send + 'static,
    {
        self.submit_linked(user, label, None, task)
    }

    /// Submits a task that also observes the caller's cancellation token.
    ///
    /// Only [`ExecutorPool::open`] starts executors: users that were never
    /// opened, stopped or forgotten are rejected.
    pub fn submit_linked<F>(
        &self,
        user: UserHandle,
        label: &'static str,
        caller: Option<CancellationToken>,
        task: F,
    ) -> Result<(), SchedulerError>
    where
        F: FnOnce(TaskContext) + Send + 'static,
    {
        let queued = QueuedTask {
            label,
            caller,
            task: Box::new(task),
        };
        let mut slots = self.slots.lock();
        match slots.get(&user) {
            Some(ExecutorSlot::Running(executor)) => executor.try_submit(queued),
            Some(ExecutorSlot::Stopped) | None => {
                metrics::record_rejected_stopped();
                Err(SchedulerError::Stopped(user))
            }
        }
    }

    /// Marks the user stopped and joins its executor. Returns whether an
    /// executor was running. Safe to call repeatedly.
    pub fn shutdown(&self, user: UserHandle) -> bool {
        let previous = self.slots.lock().insert(user, ExecutorSlot::Stopped);
        match previous {
            Some(ExecutorSlot::Running(mut executor)) => {
                executor.close();
                info!(%user, "user executor shut down");
                true
            }
            _ => {
                debug!(%user, "user executor already stopped");
                false
            }
        }
    }

    /// Shuts the user down and drops its slot. Later submissions are
    /// rejected until the user is opened again.
    pub fn forget(&self, user: UserHandle) {
        let previous = self.slots.lock().remove(&user);
        if let Some(ExecutorSlot::Running(mut executor)) = previous {
            executor.close();
        }
    }

    pub fn is_running(&self, user: UserHandle) -> bool {
        matches!(self.slots.lock().get(&user), Some(ExecutorSlot::Running(_)))
    }

    pub fn is_stopped(&self, user: UserHandle) -> bool {
        matches!(self.slots.lock().get(&user), Some(ExecutorSlot::Stopped))
    }

    pub fn queued(&self, user: UserHandle) -> Option<usize> {
        match self.slots.lock().get(&user) {
            Some(ExecutorSlot::Running(executor)) => Some(executor.queued()),
            _ => None,
        }
    }

    pub fn running_users(&self) -> Vec<UserHandle> {
        let mut users: Vec<UserHandle> = self
            .slots
            .lock()
            .iter()
            .filter_map(|(user, slot)| match slot {
                ExecutorSlot::Running(_) => Some(*user),
                ExecutorSlot::Stopped => None,
            })
            .collect();
        users.sort();
        users
    }

    pub fn shutdown_all(&self) {
        for user in self.running_users() {
            self.shutdown(user);
        }
    }
}

impl Drop for ExecutorPool {
    fn drop(&mut self) {
        let slots = std::mem::take(&mut *self.slots.lock());
        for (_, slot) in slots {
            if let ExecutorSlot::Running(mut executor) = slot {
                executor.close();
            }
        }
    }
}
