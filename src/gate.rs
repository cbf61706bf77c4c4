//! Pre-dispatch checkpoint for every inbound call.
//!
//! Checks run in a fixed order and the first failure answers the call:
//! identity, user resolution, enterprise redirection, lock state, denylist,
//! rate limit. Queue saturation is reported by the executor at dispatch time.

use std::sync::Arc;

use appsearch_core_types::{AppSearchError, CallType, CallerIdentity, UserHandle};
use appsearch_policy_center::PolicyCenter;
use appsearch_registry::{
    PerUserInstance, UnlockStateSource, UserInstanceRegistry, UserLockTracker,
};
use appsearch_scheduler::{RateLimiter, RateLimits, RatePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics;
use crate::platform::{Platform, TransportIdentity};

/// One inbound call as seen by the gate.
#[derive(Clone, Debug)]
pub struct CallRequest {
    pub call_type: CallType,
    /// Package the caller claims to be.
    pub package_name: String,
    pub database: Option<String>,
    pub transport: TransportIdentity,
    pub user: UserHandle,
    pub for_enterprise: bool,
    pub attribution_chain: Vec<String>,
    /// Cancelled by the transport when the caller goes away.
    pub disconnect: Option<CancellationToken>,
}

impl CallRequest {
    pub fn new(
        call_type: CallType,
        package_name: impl Into<String>,
        transport: TransportIdentity,
        user: UserHandle,
    ) -> Self {
        Self {
            call_type,
            package_name: package_name.into(),
            database: None,
            transport,
            user,
            for_enterprise: false,
            attribution_chain: Vec::new(),
            disconnect: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn for_enterprise(mut self) -> Self {
        self.for_enterprise = true;
        self
    }

    pub fn with_attribution_chain(mut self, chain: Vec<String>) -> Self {
        self.attribution_chain = chain;
        self
    }

    pub fn with_disconnect(mut self, token: CancellationToken) -> Self {
        self.disconnect = Some(token);
        self
    }
}

/// A call that passed every check and may be dispatched.
pub struct AdmittedCall {
    pub caller: CallerIdentity,
    pub user: UserHandle,
    pub instance: Arc<PerUserInstance>,
    pub permit: Option<RatePermit>,
}

pub enum Admission {
    Admitted(AdmittedCall),
    /// Enterprise call without a usable managed profile; answered with an
    /// empty result.
    EnterpriseUnavailable,
}

pub struct CallAdmissionGate {
    platform: Arc<dyn Platform>,
    unlock_state: Arc<dyn UnlockStateSource>,
    policy: Arc<dyn PolicyCenter>,
    locks: Arc<UserLockTracker>,
    registry: Arc<UserInstanceRegistry>,
    limiter: RateLimiter,
}

impl CallAdmissionGate {
    pub fn new(
        platform: Arc<dyn Platform>,
        unlock_state: Arc<dyn UnlockStateSource>,
        policy: Arc<dyn PolicyCenter>,
        locks: Arc<UserLockTracker>,
        registry: Arc<UserInstanceRegistry>,
    ) -> Self {
        Self {
            platform,
            unlock_state,
            policy,
            locks,
            registry,
            limiter: RateLimiter::new(),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn admit(&self, request: &CallRequest) -> Result<Admission, AppSearchError> {
        let outcome = self.check(request);
        match &outcome {
            Ok(Admission::Admitted(call)) => {
                metrics::record_admitted(request.call_type);
                debug!(
                    call = %request.call_type,
                    package = %request.package_name,
                    user = %call.user,
                    "call admitted"
                );
            }
            Ok(Admission::EnterpriseUnavailable) => metrics::record_enterprise_unavailable(),
            Err(err) => {
                metrics::record_rejected(request.call_type, err.kind());
                debug!(
                    call = %request.call_type,
                    package = %request.package_name,
                    error = %err,
                    "call rejected"
                );
            }
        }
        outcome
    }

    fn check(&self, request: &CallRequest) -> Result<Admission, AppSearchError> {
        let caller = self.verify_identity(request)?;
        let user = self.resolve_user(request)?;

        let (caller, target) = if request.for_enterprise {
            let Some(child) = self.locks.enterprise_child_of(user) else {
                return Ok(Admission::EnterpriseUnavailable);
            };
            if self.registry.find(child).is_none() {
                return Ok(Admission::EnterpriseUnavailable);
            }
            (caller.for_enterprise(), child)
        } else {
            (caller, user)
        };

        if !self.locks.check_unlocked(target, self.unlock_state.as_ref()) {
            return Err(AppSearchError::locked(format!("{target} is not unlocked")));
        }

        let policy = self.policy.current();
        let package = request.package_name.as_str();
        if policy
            .denylist
            .is_denied(package, request.database.as_deref(), request.call_type)
        {
            return Err(AppSearchError::Denied(format!(
                "{} is denied for {package}",
                request.call_type
            )));
        }

        let rate_limit = &policy.snapshot.rate_limit;
        let permit = if rate_limit.enabled {
            let limits = RateLimits {
                total_capacity: rate_limit.total_capacity,
                per_package_capacity: rate_limit.per_package_capacity(),
            };
            let cost = policy.api_costs.cost_of(request.call_type);
            Some(
                self.limiter
                    .try_acquire(package, cost, limits)
                    .map_err(AppSearchError::from)?,
            )
        } else {
            None
        };

        let instance = self.registry.get(target).map_err(AppSearchError::from)?;
        Ok(Admission::Admitted(AdmittedCall {
            caller,
            user: target,
            instance,
            permit,
        }))
    }

    fn verify_identity(&self, request: &CallRequest) -> Result<CallerIdentity, AppSearchError> {
        let transport = request.transport;
        let calling_user = transport.user();
        let package = request.package_name.as_str();
        match self.platform.package_uid(calling_user, package) {
            Some(uid) if uid == transport.uid => {}
            found => {
                warn!(
                    package,
                    claimed_uid = ?found,
                    transport_uid = transport.uid,
                    pid = transport.pid,
                    "package does not belong to the calling uid"
                );
                return Err(AppSearchError::security(format!(
                    "{package} does not belong to uid {}",
                    transport.uid
                )));
            }
        }
        if self.platform.is_instant_app(calling_user, package) {
            return Err(AppSearchError::security(format!(
                "instant app {package} cannot use the service"
            )));
        }
        let system_access = self.platform.has_global_search_access(calling_user, package);
        Ok(CallerIdentity::new(package, transport.uid, system_access)
            .with_attribution_chain(request.attribution_chain.clone()))
    }

    fn resolve_user(&self, request: &CallRequest) -> Result<UserHandle, AppSearchError> {
        let calling_user = request.transport.user();
        let requested = request.user;
        if requested == calling_user {
            return Ok(requested);
        }
        if requested.is_special() {
            return Err(AppSearchError::invalid_argument(format!(
                "cannot target pseudo user {requested}"
            )));
        }
        if !self
            .platform
            .holds_interact_across_users(request.transport.uid)
        {
            return Err(AppSearchError::security(format!(
                "uid {} may not act for {requested}",
                request.transport.uid
            )));
        }
        if self
            .platform
            .package_uid(requested, &request.package_name)
            .is_none()
        {
            return Err(AppSearchError::security(format!(
                "{} is not installed for {requested}",
                request.package_name
            )));
        }
        Ok(requested)
    }
}
