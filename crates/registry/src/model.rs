use std::sync::Arc;
use std::time::Instant;

use appsearch_core_types::{CallerIdentity, UserHandle};
use appsearch_state_center::CallStatsLogger;
use visibility_checker::{CompiledVisibility, VisibilityChecker, VisibilityConfigStore};

use crate::engine::Engine;

/// Everything the service holds open for one unlocked user.
pub struct PerUserInstance {
    user: UserHandle,
    engine: Arc<dyn Engine>,
    checker: VisibilityChecker,
    stats: Arc<CallStatsLogger>,
    created_at: Instant,
}

impl PerUserInstance {
    pub fn new(
        user: UserHandle,
        engine: Arc<dyn Engine>,
        checker: VisibilityChecker,
        stats: Arc<CallStatsLogger>,
    ) -> Self {
        Self {
            user,
            engine,
            checker,
            stats,
            created_at: Instant::now(),
        }
    }

    pub fn user(&self) -> UserHandle {
        self.user
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn checker(&self) -> &VisibilityChecker {
        &self.checker
    }

    pub fn stats(&self) -> &Arc<CallStatsLogger> {
        &self.stats
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether `caller` may read `prefixed_schema` owned by `owner_package`,
    /// judged against the visibility stored in this user's engine.
    pub fn is_visible(
        &self,
        caller: &CallerIdentity,
        owner_package: &str,
        prefixed_schema: &str,
    ) -> bool {
        if caller.has_self_access(owner_package) {
            return true;
        }
        self.checker.is_visible(
            caller,
            owner_package,
            prefixed_schema,
            &EngineVisibility(self.engine.as_ref()),
        )
    }
}

struct EngineVisibility<'a>(&'a dyn Engine);

impl VisibilityConfigStore for EngineVisibility<'_> {
    fn visibility(&self, prefixed_schema: &str) -> Option<Arc<CompiledVisibility>> {
        self.0.visibility(prefixed_schema)
    }
}
