use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::denylist::{ApiCosts, Denylist};
use crate::errors::PolicyError;

/// Raw, serializable service configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ServicePolicySnapshot {
    pub rev: u64,
    pub executor: ExecutorLimits,
    pub rate_limit: RateLimitPolicy,
    pub denylist: DenylistPolicy,
    pub maintenance: MaintenancePolicy,
    pub stats: StatsPolicy,
    pub provenance: HashMap<String, PolicyProvenance>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ExecutorLimits {
    /// Tasks that may wait on one user's executor before calls are rate limited.
    pub per_user_queue_capacity: usize,
    /// Worker threads of the shared executor.
    pub shared_worker_threads: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub total_capacity: u32,
    /// Share of `total_capacity` a single package may occupy, in `(0, 1]`.
    pub per_package_percentage: f32,
    /// `api:cost` pairs separated by `;`, e.g. `localPutDocuments:5;globalSearch:2`.
    pub api_costs: String,
}

impl RateLimitPolicy {
    pub fn per_package_capacity(&self) -> u32 {
        let share = self.per_package_percentage.clamp(0.0, 1.0);
        (self.total_capacity as f32 * share).floor() as u32
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct DenylistPolicy {
    /// `pkg=..&db=..&apis=..` entries separated by `;`.
    pub source: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct MaintenancePolicy {
    pub enabled: bool,
    pub full_persist_interval: String,
    pub optimize_check_interval: String,
}

impl MaintenancePolicy {
    pub fn full_persist_interval(&self) -> Result<Duration, PolicyError> {
        parse_interval(&self.full_persist_interval)
    }

    pub fn optimize_check_interval(&self) -> Result<Duration, PolicyError> {
        parse_interval(&self.optimize_check_interval)
    }
}

fn parse_interval(raw: &str) -> Result<Duration, PolicyError> {
    humantime::parse_duration(raw.trim())
        .map_err(|err| PolicyError::InvalidValue(format!("invalid interval '{raw}': {err}")))
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct StatsPolicy {
    /// Recent calls remembered per user.
    pub recent_calls_capacity: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyProvenance {
    pub path: String,
    pub source: PolicySource,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicySource {
    Builtin,
    File,
    Env,
    RuntimeOverride,
}

impl ServicePolicySnapshot {
    pub fn set_provenance(&mut self, path: &str, source: PolicySource) {
        self.provenance.insert(
            path.to_string(),
            PolicyProvenance {
                path: path.to_string(),
                source,
            },
        );
    }
}

/// Snapshot with its derived tables, shared read-only between callers.
#[derive(Clone, Debug)]
pub struct PolicyView {
    pub rev: u64,
    pub snapshot: ServicePolicySnapshot,
    pub denylist: Arc<Denylist>,
    pub api_costs: Arc<ApiCosts>,
}

impl From<ServicePolicySnapshot> for PolicyView {
    fn from(snapshot: ServicePolicySnapshot) -> Self {
        let denylist = Denylist::parse(&snapshot.denylist.source);
        let api_costs = ApiCosts::parse(&snapshot.rate_limit.api_costs);
        Self {
            rev: snapshot.rev,
            snapshot,
            denylist: Arc::new(denylist),
            api_costs: Arc::new(api_costs),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeOverrideSpec {
    pub path: String,
    pub value: serde_json::Value,
    pub owner: String,
    pub reason: String,
    pub ttl_seconds: u64,
}
