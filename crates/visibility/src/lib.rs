pub mod config;
pub mod rule;

pub use crate::config::{
    is_enterprise_set, load_visibility_from_path, load_visibility_from_reader,
    parse_visibility_str, ConfigError, Permission, PermissionSet, SchemaVisibility,
    VisibilityConfig, VisibilityDocument,
};
pub use crate::rule::{Clause, CompiledVisibility, VisibilityRule};

use std::collections::HashMap;
use std::sync::Arc;

use appsearch_core_types::{CallerIdentity, UserHandle, VISIBILITY_STORE_PACKAGE};
use tracing::trace;

/// Platform checks the evaluator depends on.
///
/// Implementations must fail closed: any lookup error answers `false`.
pub trait PermissionOracle: Send + Sync {
    /// Whether `package` is installed for `user` and signed with `sha256_certificate`.
    fn has_signing_certificate(
        &self,
        user: UserHandle,
        package: &str,
        sha256_certificate: &[u8],
    ) -> bool;

    /// Whether the caller, including its attribution chain, holds `permission`
    /// for data delivery.
    fn holds_permission(
        &self,
        user: UserHandle,
        caller: &CallerIdentity,
        permission: Permission,
    ) -> bool;

    /// Package visibility filtering: may `caller_package` see `target_package`?
    fn can_package_query(
        &self,
        user: UserHandle,
        caller_package: &str,
        target_package: &str,
    ) -> bool;

    /// Whether device policy lets the managed profile expose contacts to the caller.
    fn has_managed_profile_contacts_access(
        &self,
        user: UserHandle,
        caller: &CallerIdentity,
    ) -> bool;
}

/// Source of the visibility settings stored alongside schemas.
pub trait VisibilityConfigStore {
    fn visibility(&self, prefixed_schema: &str) -> Option<Arc<CompiledVisibility>>;
}

impl VisibilityConfigStore for HashMap<String, Arc<CompiledVisibility>> {
    fn visibility(&self, prefixed_schema: &str) -> Option<Arc<CompiledVisibility>> {
        self.get(prefixed_schema).cloned()
    }
}

/// Why a visibility decision came out the way it did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecisionReason {
    InternalSchema,
    MissingConfig,
    EnterprisePermission,
    EnterpriseDenied,
    SystemAccess,
    RuleMatched,
    NoRuleMatched,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VisibilityDecision {
    pub visible: bool,
    pub reason: DecisionReason,
}

impl VisibilityDecision {
    fn allow(reason: DecisionReason) -> Self {
        Self {
            visible: true,
            reason,
        }
    }

    fn deny(reason: DecisionReason) -> Self {
        Self {
            visible: false,
            reason,
        }
    }
}

/// Decides whether a caller may read a schema owned by another package.
///
/// Holds no state besides the user it is bound to and the platform oracle.
#[derive(Clone)]
pub struct VisibilityChecker {
    user: UserHandle,
    oracle: Arc<dyn PermissionOracle>,
}

impl VisibilityChecker {
    pub fn new(user: UserHandle, oracle: Arc<dyn PermissionOracle>) -> Self {
        Self { user, oracle }
    }

    pub fn user(&self) -> UserHandle {
        self.user
    }

    pub fn is_visible(
        &self,
        caller: &CallerIdentity,
        owner_package: &str,
        prefixed_schema: &str,
        store: &dyn VisibilityConfigStore,
    ) -> bool {
        self.evaluate(caller, owner_package, prefixed_schema, store)
            .visible
    }

    pub fn evaluate(
        &self,
        caller: &CallerIdentity,
        owner_package: &str,
        prefixed_schema: &str,
        store: &dyn VisibilityConfigStore,
    ) -> VisibilityDecision {
        let decision = self.decide(caller, owner_package, prefixed_schema, store);
        trace!(
            user = %self.user,
            caller = caller.package_name(),
            schema = prefixed_schema,
            visible = decision.visible,
            reason = ?decision.reason,
            "visibility decision"
        );
        decision
    }

    fn decide(
        &self,
        caller: &CallerIdentity,
        owner_package: &str,
        prefixed_schema: &str,
        store: &dyn VisibilityConfigStore,
    ) -> VisibilityDecision {
        if owner_package == VISIBILITY_STORE_PACKAGE {
            return VisibilityDecision::deny(DecisionReason::InternalSchema);
        }

        let Some(compiled) = store.visibility(prefixed_schema) else {
            // Unknown schemas stay closed; only system callers see them, and
            // never on behalf of a managed profile.
            return if caller.has_system_access() && !caller.is_enterprise() {
                VisibilityDecision::allow(DecisionReason::MissingConfig)
            } else {
                VisibilityDecision::deny(DecisionReason::MissingConfig)
            };
        };

        if caller.is_enterprise() {
            return if self.passes_enterprise_sets(caller, &compiled.enterprise_sets) {
                VisibilityDecision::allow(DecisionReason::EnterprisePermission)
            } else {
                VisibilityDecision::deny(DecisionReason::EnterpriseDenied)
            };
        }

        if caller.has_system_access() && compiled.displayed_by_system {
            return VisibilityDecision::allow(DecisionReason::SystemAccess);
        }

        let granted = compiled
            .rule
            .as_ref()
            .map(|rule| rule.evaluate(&mut |clause: &Clause| self.check_clause(caller, clause)))
            .unwrap_or(false);
        if granted {
            VisibilityDecision::allow(DecisionReason::RuleMatched)
        } else {
            VisibilityDecision::deny(DecisionReason::NoRuleMatched)
        }
    }

    fn check_clause(&self, caller: &CallerIdentity, clause: &Clause) -> bool {
        match clause {
            Clause::PackageMatch(packages) => packages.iter().any(|allowed| {
                allowed.package_name == caller.package_name()
                    && self.oracle.has_signing_certificate(
                        self.user,
                        &allowed.package_name,
                        &allowed.sha256_certificate,
                    )
            }),
            Clause::PermissionMatch(sets) => sets.iter().any(|set| {
                set.iter()
                    .all(|permission| self.oracle.holds_permission(self.user, caller, *permission))
            }),
            Clause::PublicMatch(target) => {
                self.oracle
                    .can_package_query(self.user, caller.package_name(), &target.package_name)
                    && self.oracle.has_signing_certificate(
                        self.user,
                        &target.package_name,
                        &target.sha256_certificate,
                    )
            }
        }
    }

    fn passes_enterprise_sets(&self, caller: &CallerIdentity, sets: &[PermissionSet]) -> bool {
        sets.iter().any(|set| {
            set.iter().all(|permission| match permission {
                Permission::EnterpriseAccess => caller.is_enterprise(),
                Permission::ManagedProfileContactsAccess => {
                    caller.is_enterprise()
                        && self
                            .oracle
                            .has_managed_profile_contacts_access(self.user, caller)
                }
                other => self.oracle.holds_permission(self.user, caller, *other),
            })
        })
    }
}
