pub mod api;
pub mod defaults;
pub mod denylist;
pub mod errors;
pub mod loader;
pub mod model;
pub mod override_store;

pub use api::{InMemoryPolicyCenter, PolicyCenter};
pub use defaults::default_snapshot;
pub use denylist::{ApiCosts, Denylist};
pub use errors::PolicyError;
pub use loader::{load_snapshot, load_snapshot_with_options, LoadOptions};
pub use model::{
    DenylistPolicy, ExecutorLimits, MaintenancePolicy, PolicySource, PolicyView, RateLimitPolicy,
    RuntimeOverrideSpec, ServicePolicySnapshot, StatsPolicy,
};

#[cfg(test)]
mod tests;
