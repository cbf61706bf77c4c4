//! Seams onto the host platform: package manager, user manager and
//! permission checks. Every lookup must fail closed.

use std::collections::{HashMap, HashSet};

use appsearch_core_types::{CallerIdentity, Uid, UserHandle};
use appsearch_registry::UnlockStateSource;
use parking_lot::RwLock;
use visibility_checker::{Permission, PermissionOracle};

/// Identity of the process on the other end of the transport, as reported by
/// the transport itself rather than by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportIdentity {
    pub uid: Uid,
    pub pid: u32,
}

impl TransportIdentity {
    pub fn new(uid: Uid, pid: u32) -> Self {
        Self { uid, pid }
    }

    pub fn user(&self) -> UserHandle {
        UserHandle::from_uid(self.uid)
    }
}

pub trait Platform: Send + Sync {
    /// Uid of `package` in `user`; `None` when it is not installed there.
    fn package_uid(&self, user: UserHandle, package: &str) -> Option<Uid>;

    fn is_instant_app(&self, user: UserHandle, package: &str) -> bool;

    /// Whether `uid` may act on behalf of other users.
    fn holds_interact_across_users(&self, uid: Uid) -> bool;

    /// Whether `package` may read every package's data that is displayed by
    /// the system.
    fn has_global_search_access(&self, user: UserHandle, package: &str) -> bool;

    fn installed_packages(&self, user: UserHandle) -> HashSet<String>;

    /// Parent of `user` when `user` is a managed profile.
    fn managed_profile_parent(&self, user: UserHandle) -> Option<UserHandle>;
}

#[derive(Debug, Default)]
struct FakeState {
    packages: HashMap<(UserHandle, String), Uid>,
    instant_apps: HashSet<(UserHandle, String)>,
    cross_user_uids: HashSet<Uid>,
    global_search: HashSet<String>,
    certificates: HashSet<(String, Vec<u8>)>,
    permissions: HashMap<String, HashSet<Permission>>,
    queryable: HashSet<(String, String)>,
    contacts_access: bool,
    unlocked: HashSet<UserHandle>,
    profile_parents: HashMap<UserHandle, UserHandle>,
}

/// Scriptable platform for tests and local runs.
#[derive(Debug, Default)]
pub struct FakePlatform {
    state: RwLock<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, user: UserHandle, package: &str, uid: Uid) -> &Self {
        self.state
            .write()
            .packages
            .insert((user, package.to_string()), uid);
        self
    }

    pub fn uninstall(&self, user: UserHandle, package: &str) -> &Self {
        self.state
            .write()
            .packages
            .remove(&(user, package.to_string()));
        self
    }

    pub fn mark_instant_app(&self, user: UserHandle, package: &str) -> &Self {
        self.state
            .write()
            .instant_apps
            .insert((user, package.to_string()));
        self
    }

    pub fn grant_cross_user(&self, uid: Uid) -> &Self {
        self.state.write().cross_user_uids.insert(uid);
        self
    }

    pub fn grant_global_search(&self, package: &str) -> &Self {
        self.state.write().global_search.insert(package.to_string());
        self
    }

    pub fn sign(&self, package: &str, certificate: &[u8]) -> &Self {
        self.state
            .write()
            .certificates
            .insert((package.to_string(), certificate.to_vec()));
        self
    }

    pub fn grant(&self, package: &str, permissions: &[Permission]) -> &Self {
        self.state
            .write()
            .permissions
            .entry(package.to_string())
            .or_default()
            .extend(permissions.iter().copied());
        self
    }

    pub fn allow_query(&self, caller: &str, target: &str) -> &Self {
        self.state
            .write()
            .queryable
            .insert((caller.to_string(), target.to_string()));
        self
    }

    pub fn set_contacts_access(&self, allowed: bool) -> &Self {
        self.state.write().contacts_access = allowed;
        self
    }

    pub fn set_unlocked(&self, user: UserHandle, unlocked: bool) -> &Self {
        let mut state = self.state.write();
        if unlocked {
            state.unlocked.insert(user);
        } else {
            state.unlocked.remove(&user);
        }
        drop(state);
        self
    }

    pub fn set_profile_parent(&self, profile: UserHandle, parent: UserHandle) -> &Self {
        self.state.write().profile_parents.insert(profile, parent);
        self
    }
}

impl Platform for FakePlatform {
    fn package_uid(&self, user: UserHandle, package: &str) -> Option<Uid> {
        self.state
            .read()
            .packages
            .get(&(user, package.to_string()))
            .copied()
    }

    fn is_instant_app(&self, user: UserHandle, package: &str) -> bool {
        self.state
            .read()
            .instant_apps
            .contains(&(user, package.to_string()))
    }

    fn holds_interact_across_users(&self, uid: Uid) -> bool {
        self.state.read().cross_user_uids.contains(&uid)
    }

    fn has_global_search_access(&self, _user: UserHandle, package: &str) -> bool {
        self.state.read().global_search.contains(package)
    }

    fn installed_packages(&self, user: UserHandle) -> HashSet<String> {
        self.state
            .read()
            .packages
            .keys()
            .filter(|(owner, _)| *owner == user)
            .map(|(_, package)| package.clone())
            .collect()
    }

    fn managed_profile_parent(&self, user: UserHandle) -> Option<UserHandle> {
        self.state.read().profile_parents.get(&user).copied()
    }
}

impl PermissionOracle for FakePlatform {
    fn has_signing_certificate(
        &self,
        user: UserHandle,
        package: &str,
        sha256_certificate: &[u8],
    ) -> bool {
        let state = self.state.read();
        state
            .packages
            .contains_key(&(user, package.to_string()))
            && state
                .certificates
                .contains(&(package.to_string(), sha256_certificate.to_vec()))
    }

    fn holds_permission(
        &self,
        _user: UserHandle,
        caller: &CallerIdentity,
        permission: Permission,
    ) -> bool {
        let state = self.state.read();
        let holds = |package: &str| {
            state
                .permissions
                .get(package)
                .is_some_and(|held| held.contains(&permission))
        };
        holds(caller.package_name())
            && caller
                .attribution_chain()
                .iter()
                .all(|package| holds(package))
    }

    fn can_package_query(
        &self,
        _user: UserHandle,
        caller_package: &str,
        target_package: &str,
    ) -> bool {
        self.state
            .read()
            .queryable
            .contains(&(caller_package.to_string(), target_package.to_string()))
    }

    fn has_managed_profile_contacts_access(
        &self,
        _user: UserHandle,
        _caller: &CallerIdentity,
    ) -> bool {
        self.state.read().contacts_access
    }
}

impl UnlockStateSource for FakePlatform {
    fn is_user_unlocked(&self, user: UserHandle) -> bool {
        self.state.read().unlocked.contains(&user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_requires_installation_in_the_user() {
        let platform = FakePlatform::new();
        platform.sign("com.example", b"cert");
        assert!(!platform.has_signing_certificate(UserHandle::of(0), "com.example", b"cert"));
        platform.install(UserHandle::of(0), "com.example", 10_001);
        assert!(platform.has_signing_certificate(UserHandle::of(0), "com.example", b"cert"));
        assert!(!platform.has_signing_certificate(UserHandle::of(10), "com.example", b"cert"));
    }

    #[test]
    fn attribution_chain_must_hold_the_permission_too() {
        let platform = FakePlatform::new();
        platform.grant("com.caller", &[Permission::ReadSms]);
        let direct = CallerIdentity::new("com.caller", 10_001, false);
        let proxied = direct
            .clone()
            .with_attribution_chain(vec!["com.proxy".to_string()]);
        assert!(platform.holds_permission(UserHandle::of(0), &direct, Permission::ReadSms));
        assert!(!platform.holds_permission(UserHandle::of(0), &proxied, Permission::ReadSms));
    }

    #[test]
    fn installed_packages_are_scoped_per_user() {
        let platform = FakePlatform::new();
        platform
            .install(UserHandle::of(0), "a", 10_001)
            .install(UserHandle::of(10), "b", 1_010_002);
        assert_eq!(
            platform.installed_packages(UserHandle::of(0)),
            ["a".to_string()].into_iter().collect()
        );
    }
}
