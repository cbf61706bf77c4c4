use std::sync::Arc;

use appsearch_core_types::UserHandle;
use appsearch_policy_center::PolicyCenter;
use appsearch_registry::{ChangeNotification, EngineFactory, UnlockStateSource};
use tokio::runtime::Handle;
use tracing::trace;
use visibility_checker::PermissionOracle;

use crate::platform::Platform;

/// Receives the documents changed by a mutating call, after it finished.
pub trait ChangeNotificationSink: Send + Sync {
    fn deliver(&self, user: UserHandle, changes: Vec<ChangeNotification>);
}

/// Drops notifications; used when no observer is registered.
pub struct NoopChangeSink;

impl ChangeNotificationSink for NoopChangeSink {
    fn deliver(&self, user: UserHandle, changes: Vec<ChangeNotification>) {
        trace!(%user, changes = changes.len(), "change notifications dropped");
    }
}

/// Every collaborator of the service, built once at startup.
#[derive(Clone)]
pub struct ServiceEnvironment {
    pub platform: Arc<dyn Platform>,
    pub unlock_state: Arc<dyn UnlockStateSource>,
    pub oracle: Arc<dyn PermissionOracle>,
    pub policy: Arc<dyn PolicyCenter>,
    pub engines: Arc<dyn EngineFactory>,
    pub notifications: Arc<dyn ChangeNotificationSink>,
    pub runtime: Handle,
}

impl ServiceEnvironment {
    /// `platform` answers identity, unlock-state and permission questions.
    pub fn new<P>(
        platform: Arc<P>,
        policy: Arc<dyn PolicyCenter>,
        engines: Arc<dyn EngineFactory>,
        runtime: Handle,
    ) -> Self
    where
        P: Platform + UnlockStateSource + PermissionOracle + 'static,
    {
        Self {
            platform: platform.clone(),
            unlock_state: platform.clone(),
            oracle: platform,
            policy,
            engines,
            notifications: Arc::new(NoopChangeSink),
            runtime,
        }
    }

    pub fn with_notifications(mut self, sink: Arc<dyn ChangeNotificationSink>) -> Self {
        self.notifications = sink;
        self
    }
}
