use std::collections::HashMap;
use std::sync::Arc;

use appsearch_core_types::UserHandle;
use appsearch_state_center::CallStatsLogger;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};
use visibility_checker::{PermissionOracle, VisibilityChecker};

use crate::{
    engine::{EngineFactory, PersistMode},
    errors::RegistryError,
    metrics,
    model::PerUserInstance,
};

#[derive(Clone, Copy, Debug)]
pub struct InstanceOptions {
    pub recent_calls_capacity: usize,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            recent_calls_capacity: 50,
        }
    }
}

/// Map from user to their open instance.
///
/// Creation and removal of one user are serialized by a per-user lock, so
/// two unlock notifications never open the engine twice. Other users are
/// never blocked by a slow open.
pub struct UserInstanceRegistry {
    instances: RwLock<HashMap<UserHandle, Arc<PerUserInstance>>>,
    transitions: DashMap<UserHandle, Arc<Mutex<()>>>,
    factory: Arc<dyn EngineFactory>,
    oracle: Arc<dyn PermissionOracle>,
    options: InstanceOptions,
}

impl UserInstanceRegistry {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        oracle: Arc<dyn PermissionOracle>,
        options: InstanceOptions,
    ) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            transitions: DashMap::new(),
            factory,
            oracle,
            options,
        }
    }

    /// Returns the instance of `user`, opening it first if needed.
    ///
    /// A failed open leaves nothing registered; the next call retries.
    pub fn get_or_create(&self, user: UserHandle) -> Result<Arc<PerUserInstance>, RegistryError> {
        if let Some(found) = self.find(user) {
            return Ok(found);
        }
        let transition = self.transition_lock(user);
        let _guard = transition.lock();
        if let Some(found) = self.find(user) {
            return Ok(found);
        }

        let engine = self.factory.open(user).map_err(|source| {
            metrics::record_create_failure();
            warn!(%user, error = %source, "failed to open instance");
            RegistryError::Open { user, source }
        })?;
        let instance = Arc::new(PerUserInstance::new(
            user,
            engine,
            VisibilityChecker::new(user, Arc::clone(&self.oracle)),
            Arc::new(CallStatsLogger::new(self.options.recent_calls_capacity)),
        ));
        let live = {
            let mut instances = self.instances.write();
            instances.insert(user, Arc::clone(&instance));
            instances.len()
        };
        metrics::record_instance_created(live);
        info!(%user, "instance opened");
        Ok(instance)
    }

    pub fn get(&self, user: UserHandle) -> Result<Arc<PerUserInstance>, RegistryError> {
        self.find(user).ok_or(RegistryError::NotFound(user))
    }

    pub fn find(&self, user: UserHandle) -> Option<Arc<PerUserInstance>> {
        self.instances.read().get(&user).cloned()
    }

    /// Persists and closes the engine of `user` and forgets the instance.
    ///
    /// Engine failures are logged and swallowed; the instance is gone either
    /// way. Returns whether an instance was open.
    pub fn close_and_remove(&self, user: UserHandle) -> bool {
        let transition = self.transition_lock(user);
        let _guard = transition.lock();
        let (removed, live) = {
            let mut instances = self.instances.write();
            let removed = instances.remove(&user);
            (removed, instances.len())
        };
        let Some(instance) = removed else {
            return false;
        };
        if let Err(err) = instance.engine().persist_to_disk(PersistMode::Full) {
            warn!(%user, error = %err, "persist before close failed");
        }
        if let Err(err) = instance.engine().close() {
            warn!(%user, error = %err, "engine close failed");
        }
        metrics::record_instance_closed(live);
        info!(%user, "instance closed");
        true
    }

    /// Closes the instance of a removed user and drops its transition lock.
    pub fn forget(&self, user: UserHandle) -> bool {
        let closed = self.close_and_remove(user);
        self.transitions.remove(&user);
        closed
    }

    /// Users with an open instance, ascending.
    pub fn users(&self) -> Vec<UserHandle> {
        let mut users: Vec<UserHandle> = self.instances.read().keys().copied().collect();
        users.sort();
        users
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn transition_lock(&self, user: UserHandle) -> Arc<Mutex<()>> {
        Arc::clone(self.transitions.entry(user).or_default().value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEngineFactory;
    use appsearch_core_types::CallerIdentity;
    use visibility_checker::Permission;

    struct DenyAll;

    impl PermissionOracle for DenyAll {
        fn has_signing_certificate(&self, _: UserHandle, _: &str, _: &[u8]) -> bool {
            false
        }
        fn holds_permission(&self, _: UserHandle, _: &CallerIdentity, _: Permission) -> bool {
            false
        }
        fn can_package_query(&self, _: UserHandle, _: &str, _: &str) -> bool {
            false
        }
        fn has_managed_profile_contacts_access(&self, _: UserHandle, _: &CallerIdentity) -> bool {
            false
        }
    }

    fn registry(factory: Arc<MemoryEngineFactory>) -> UserInstanceRegistry {
        UserInstanceRegistry::new(factory, Arc::new(DenyAll), InstanceOptions::default())
    }

    #[test]
    fn instance_is_opened_once() {
        let factory = Arc::new(MemoryEngineFactory::new());
        let registry = registry(Arc::clone(&factory));
        let user = UserHandle::of(10);
        let first = registry.get_or_create(user).unwrap();
        let second = registry.get_or_create(user).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.open_count(user), 1);
        assert_eq!(registry.users(), vec![user]);
    }

    #[test]
    fn failed_open_registers_nothing() {
        let factory = Arc::new(MemoryEngineFactory::new());
        let registry = registry(Arc::clone(&factory));
        let user = UserHandle::of(11);
        factory.fail_next_open();
        assert!(matches!(
            registry.get_or_create(user),
            Err(RegistryError::Open { .. })
        ));
        assert!(registry.is_empty());
        assert_eq!(registry.get(user).err(), Some(RegistryError::NotFound(user)));
        assert!(registry.get_or_create(user).is_ok());
    }

    #[test]
    fn close_persists_and_is_idempotent() {
        let factory = Arc::new(MemoryEngineFactory::new());
        let registry = registry(Arc::clone(&factory));
        let user = UserHandle::of(12);
        registry.get_or_create(user).unwrap();
        assert!(registry.close_and_remove(user));
        assert!(!registry.close_and_remove(user));

        let handle = factory.handle(user).unwrap();
        assert!(handle.is_closed());
        assert_eq!(handle.persist_log(), vec![PersistMode::Full]);
        assert!(registry.find(user).is_none());
    }

    #[test]
    fn forgotten_users_leave_no_transition_lock() {
        let factory = Arc::new(MemoryEngineFactory::new());
        let registry = registry(Arc::clone(&factory));
        let kept = UserHandle::of(14);
        let removed = UserHandle::of(15);
        registry.get_or_create(kept).unwrap();
        registry.get_or_create(removed).unwrap();
        assert_eq!(registry.transitions.len(), 2);

        assert!(registry.forget(removed));
        assert!(!registry.forget(removed));
        assert_eq!(registry.users(), vec![kept]);
        assert_eq!(registry.transitions.len(), 1);
        assert!(factory.handle(removed).unwrap().is_closed());
    }

    #[test]
    fn concurrent_creation_opens_one_engine() {
        let factory = Arc::new(MemoryEngineFactory::new());
        let registry = Arc::new(registry(Arc::clone(&factory)));
        let user = UserHandle::of(13);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_or_create(user).map(|_| ()))
            })
            .collect();
        for thread in threads {
            thread.join().unwrap().unwrap();
        }
        assert_eq!(factory.open_count(user), 1);
    }
}
