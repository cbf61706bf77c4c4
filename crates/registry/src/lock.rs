use std::collections::BTreeSet;

use appsearch_core_types::UserHandle;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::metrics;

/// Platform answer to "is this user's storage unlocked right now".
pub trait UnlockStateSource: Send + Sync {
    fn is_user_unlocked(&self, user: UserHandle) -> bool;
}

#[derive(Debug, Default)]
struct LockState {
    unlocked: BTreeSet<UserHandle>,
    /// Parent user to its managed profile. At most one pair is tracked.
    enterprise: Option<(UserHandle, UserHandle)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    pub unlocked: Vec<UserHandle>,
    pub enterprise_parent: Option<UserHandle>,
    pub enterprise_child: Option<UserHandle>,
}

/// Cache of unlocked users fed by lifecycle notifications.
///
/// A miss falls back to the platform without filling the cache; only an
/// unlock notification adds a user, so a user being torn down is never
/// brought back by a racing call.
#[derive(Debug, Default)]
pub struct UserLockTracker {
    state: RwLock<LockState>,
}

impl UserLockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_unlocked(&self, user: UserHandle) {
        let len = {
            let mut state = self.state.write();
            state.unlocked.insert(user);
            state.unlocked.len()
        };
        metrics::set_unlocked_users(len);
        debug!(%user, "user marked unlocked");
    }

    /// Also drops any enterprise pairing that involves `user`.
    pub fn mark_locked(&self, user: UserHandle) {
        let len = {
            let mut state = self.state.write();
            state.unlocked.remove(&user);
            clear_pair(&mut state, user);
            state.unlocked.len()
        };
        metrics::set_unlocked_users(len);
        debug!(%user, "user marked locked");
    }

    pub fn is_unlocked_cached(&self, user: UserHandle) -> bool {
        self.state.read().unlocked.contains(&user)
    }

    pub fn check_unlocked(&self, user: UserHandle, platform: &dyn UnlockStateSource) -> bool {
        if self.is_unlocked_cached(user) {
            return true;
        }
        platform.is_user_unlocked(user)
    }

    /// Replaces the tracked pair with `parent` and its managed profile `child`.
    pub fn set_enterprise_pair(&self, parent: UserHandle, child: UserHandle) {
        self.state.write().enterprise = Some((parent, child));
    }

    pub fn enterprise_child_of(&self, parent: UserHandle) -> Option<UserHandle> {
        match self.state.read().enterprise {
            Some((tracked, child)) if tracked == parent => Some(child),
            _ => None,
        }
    }

    pub fn clear_enterprise_for(&self, user: UserHandle) {
        clear_pair(&mut self.state.write(), user);
    }

    pub fn unlocked_users(&self) -> Vec<UserHandle> {
        self.state.read().unlocked.iter().copied().collect()
    }

    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.state.read();
        LockSnapshot {
            unlocked: state.unlocked.iter().copied().collect(),
            enterprise_parent: state.enterprise.map(|(parent, _)| parent),
            enterprise_child: state.enterprise.map(|(_, child)| child),
        }
    }
}

fn clear_pair(state: &mut LockState, user: UserHandle) {
    if matches!(state.enterprise, Some((parent, child)) if parent == user || child == user) {
        state.enterprise = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Platform {
        unlocked: HashMap<UserHandle, bool>,
        queries: AtomicUsize,
    }

    impl UnlockStateSource for Platform {
        fn is_user_unlocked(&self, user: UserHandle) -> bool {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.unlocked.get(&user).copied().unwrap_or(false)
        }
    }

    #[test]
    fn cache_hit_skips_platform() {
        let tracker = UserLockTracker::new();
        let platform = Platform {
            unlocked: HashMap::new(),
            queries: AtomicUsize::new(0),
        };
        tracker.mark_unlocked(UserHandle::of(10));
        assert!(tracker.check_unlocked(UserHandle::of(10), &platform));
        assert_eq!(platform.queries.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn platform_fallback_does_not_fill_cache() {
        let tracker = UserLockTracker::new();
        let platform = Platform {
            unlocked: [(UserHandle::of(11), true)].into_iter().collect(),
            queries: AtomicUsize::new(0),
        };
        assert!(tracker.check_unlocked(UserHandle::of(11), &platform));
        assert!(!tracker.is_unlocked_cached(UserHandle::of(11)));
        assert!(!tracker.check_unlocked(UserHandle::of(12), &platform));
        assert_eq!(platform.queries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn locking_either_side_clears_enterprise_pair() {
        let tracker = UserLockTracker::new();
        tracker.mark_unlocked(UserHandle::of(0));
        tracker.mark_unlocked(UserHandle::of(10));
        tracker.set_enterprise_pair(UserHandle::of(0), UserHandle::of(10));
        assert_eq!(
            tracker.enterprise_child_of(UserHandle::of(0)),
            Some(UserHandle::of(10))
        );
        assert_eq!(tracker.enterprise_child_of(UserHandle::of(10)), None);

        tracker.mark_locked(UserHandle::of(10));
        assert_eq!(tracker.enterprise_child_of(UserHandle::of(0)), None);
        assert_eq!(
            tracker.snapshot(),
            LockSnapshot {
                unlocked: vec![UserHandle::of(0)],
                enterprise_parent: None,
                enterprise_child: None,
            }
        );
    }

    #[test]
    fn a_new_pair_replaces_the_old_one() {
        let tracker = UserLockTracker::new();
        tracker.set_enterprise_pair(UserHandle::of(0), UserHandle::of(10));
        tracker.set_enterprise_pair(UserHandle::of(1), UserHandle::of(11));
        assert_eq!(tracker.enterprise_child_of(UserHandle::of(0)), None);
        assert_eq!(
            tracker.enterprise_child_of(UserHandle::of(1)),
            Some(UserHandle::of(11))
        );
        tracker.clear_enterprise_for(UserHandle::of(1));
        assert!(tracker.snapshot().enterprise_parent.is_none());
    }
}
