use std::fmt;

/// Linux uid of an application process.
pub type Uid = u32;

/// Number of uids reserved per device user.
const PER_USER_RANGE: u32 = 100_000;

/// Identifier of an Android device user.
///
/// Negative values are pseudo users that never own data.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct UserHandle(pub i32);

impl UserHandle {
    pub const SYSTEM: UserHandle = UserHandle(0);
    pub const ALL: UserHandle = UserHandle(-1);
    pub const CURRENT: UserHandle = UserHandle(-2);
    pub const CURRENT_OR_SELF: UserHandle = UserHandle(-3);
    pub const NULL: UserHandle = UserHandle(-10_000);

    pub fn of(id: i32) -> Self {
        Self(id)
    }

    /// Derives the owning user from an application uid.
    pub fn from_uid(uid: Uid) -> Self {
        Self((uid / PER_USER_RANGE) as i32)
    }

    pub fn id(self) -> i32 {
        self.0
    }

    /// Pseudo users (`ALL`, `CURRENT`, `NULL`, ...) cannot be targeted by a call.
    pub fn is_special(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for UserHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// A package name paired with the SHA-256 digest of its signing certificate.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PackageIdentifier {
    pub package_name: String,
    pub sha256_certificate: Vec<u8>,
}

impl PackageIdentifier {
    pub fn new(package_name: impl Into<String>, sha256_certificate: impl Into<Vec<u8>>) -> Self {
        Self {
            package_name: package_name.into(),
            sha256_certificate: sha256_certificate.into(),
        }
    }
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#", self.package_name)?;
        for byte in self.sha256_certificate.iter().take(4) {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Verified identity of the caller of one inbound request.
///
/// Built fresh for every call once the admission gate has matched the claimed
/// package against the transport uid. Enterprise identities never receive
/// implicit access to their own package's data.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallerIdentity {
    package_name: String,
    uid: Uid,
    attribution_chain: Vec<String>,
    has_system_access: bool,
    is_enterprise: bool,
}

impl CallerIdentity {
    pub fn new(package_name: impl Into<String>, uid: Uid, has_system_access: bool) -> Self {
        Self {
            package_name: package_name.into(),
            uid,
            attribution_chain: Vec::new(),
            has_system_access,
            is_enterprise: false,
        }
    }

    pub fn with_attribution_chain(mut self, chain: Vec<String>) -> Self {
        self.attribution_chain = chain;
        self
    }

    /// Marks the identity as acting on behalf of a managed profile.
    pub fn for_enterprise(mut self) -> Self {
        self.is_enterprise = true;
        self
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn user(&self) -> UserHandle {
        UserHandle::from_uid(self.uid)
    }

    pub fn attribution_chain(&self) -> &[String] {
        &self.attribution_chain
    }

    pub fn has_system_access(&self) -> bool {
        self.has_system_access
    }

    pub fn is_enterprise(&self) -> bool {
        self.is_enterprise
    }

    /// Whether the caller may read data owned by `owner_package` without a
    /// visibility check.
    pub fn has_self_access(&self, owner_package: &str) -> bool {
        !self.is_enterprise && self.package_name == owner_package
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_is_derived_from_uid_range() {
        assert_eq!(UserHandle::from_uid(10_123), UserHandle::SYSTEM);
        assert_eq!(UserHandle::from_uid(1_010_123), UserHandle(10));
    }

    #[test]
    fn pseudo_users_are_special() {
        assert!(UserHandle::ALL.is_special());
        assert!(UserHandle::NULL.is_special());
        assert!(!UserHandle(10).is_special());
    }

    #[test]
    fn enterprise_identity_has_no_self_access() {
        let caller = CallerIdentity::new("com.example.mail", 10_050, false);
        assert!(caller.has_self_access("com.example.mail"));
        let enterprise = caller.for_enterprise();
        assert!(!enterprise.has_self_access("com.example.mail"));
    }
}
