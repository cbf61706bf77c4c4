use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use appsearch_core_types::UserHandle;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaintenanceKind {
    FullPersist,
    CheckForOptimize,
}

impl MaintenanceKind {
    pub const ALL: [MaintenanceKind; 2] =
        [MaintenanceKind::FullPersist, MaintenanceKind::CheckForOptimize];

    pub fn as_str(self) -> &'static str {
        match self {
            MaintenanceKind::FullPersist => "full_persist",
            MaintenanceKind::CheckForOptimize => "check_for_optimize",
        }
    }
}

impl fmt::Display for MaintenanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of one maintenance run. Receives the token of the run it belongs to.
pub type MaintenanceRun = Arc<dyn Fn(CancellationToken) + Send + Sync>;

/// Keeps at most one maintenance job in flight per (user, kind).
///
/// Scheduling a job cancels the previous token for the same key before the
/// new one is stored.
pub struct MaintenanceScheduler {
    handle: Handle,
    runs: DashMap<(UserHandle, MaintenanceKind), CancellationToken>,
}

impl MaintenanceScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            runs: DashMap::new(),
        }
    }

    pub fn schedule_periodic(
        &self,
        user: UserHandle,
        kind: MaintenanceKind,
        interval: Duration,
        run: MaintenanceRun,
    ) -> CancellationToken {
        let token = self.replace(user, kind);
        let task_token = token.clone();
        self.handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = sleep(interval) => {
                        debug!(%user, %kind, "maintenance tick");
                        run(task_token.clone());
                    }
                }
            }
            debug!(%user, %kind, "maintenance loop ended");
        });
        info!(%user, %kind, interval = ?interval, "maintenance scheduled");
        token
    }

    pub fn is_active(&self, user: UserHandle, kind: MaintenanceKind) -> bool {
        self.runs
            .get(&(user, kind))
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Cancels every job of `user`; returns how many were cancelled.
    pub fn cancel_user(&self, user: UserHandle) -> usize {
        let mut cancelled = 0;
        for kind in MaintenanceKind::ALL {
            if let Some((_, token)) = self.runs.remove(&(user, kind)) {
                token.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(%user, cancelled, "maintenance cancelled");
        }
        cancelled
    }

    pub fn cancel_all(&self) {
        for entry in self.runs.iter() {
            entry.value().cancel();
        }
        self.runs.clear();
    }

    fn replace(&self, user: UserHandle, kind: MaintenanceKind) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.runs.insert((user, kind), token.clone()) {
            previous.cancel();
            debug!(%user, %kind, "replaced in-flight maintenance");
        }
        token
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn periodic_job_ticks_until_cancelled() {
        let scheduler = MaintenanceScheduler::new(Handle::current());
        let user = UserHandle::of(10);
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        scheduler.schedule_periodic(
            user,
            MaintenanceKind::FullPersist,
            Duration::from_millis(5),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        while ticks.load(Ordering::SeqCst) < 2 {
            sleep(Duration::from_millis(5)).await;
        }
        assert!(scheduler.is_active(user, MaintenanceKind::FullPersist));
        assert_eq!(scheduler.cancel_user(user), 1);
        assert!(!scheduler.is_active(user, MaintenanceKind::FullPersist));
        sleep(Duration::from_millis(20)).await;
        let settled = ticks.load(Ordering::SeqCst);
        sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn rescheduling_cancels_the_previous_job() {
        let scheduler = MaintenanceScheduler::new(Handle::current());
        let user = UserHandle::of(10);
        let tokens = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&tokens);
        let run: MaintenanceRun = Arc::new(move |token| seen.lock().unwrap().push(token));

        let first = scheduler.schedule_periodic(
            user,
            MaintenanceKind::CheckForOptimize,
            Duration::from_millis(5),
            Arc::clone(&run),
        );
        while tokens.lock().unwrap().is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
        let second = scheduler.schedule_periodic(
            user,
            MaintenanceKind::CheckForOptimize,
            Duration::from_secs(3600),
            run,
        );
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(tokens.lock().unwrap()[0].is_cancelled());
        assert!(scheduler.is_active(user, MaintenanceKind::CheckForOptimize));
    }

    #[tokio::test]
    async fn kinds_and_users_are_independent() {
        let scheduler = MaintenanceScheduler::new(Handle::current());
        let noop: MaintenanceRun = Arc::new(|_| {});
        let hour = Duration::from_secs(3600);
        let persist = scheduler.schedule_periodic(
            UserHandle::of(10),
            MaintenanceKind::FullPersist,
            hour,
            Arc::clone(&noop),
        );
        let optimize = scheduler.schedule_periodic(
            UserHandle::of(10),
            MaintenanceKind::CheckForOptimize,
            hour,
            Arc::clone(&noop),
        );
        let other = scheduler.schedule_periodic(
            UserHandle::of(11),
            MaintenanceKind::FullPersist,
            hour,
            noop,
        );
        assert!(!persist.is_cancelled() && !optimize.is_cancelled());
        assert_eq!(scheduler.cancel_user(UserHandle::of(10)), 2);
        assert!(persist.is_cancelled() && optimize.is_cancelled());
        assert!(!other.is_cancelled());
    }
}
