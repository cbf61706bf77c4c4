use crate::model::{
    DenylistPolicy, ExecutorLimits, MaintenancePolicy, RateLimitPolicy, ServicePolicySnapshot,
    StatsPolicy,
};

pub fn default_snapshot() -> ServicePolicySnapshot {
    ServicePolicySnapshot {
        rev: 1,
        executor: ExecutorLimits {
            per_user_queue_capacity: 1_000,
            shared_worker_threads: 4,
        },
        rate_limit: RateLimitPolicy {
            enabled: false,
            total_capacity: 1_000,
            per_package_percentage: 0.5,
            api_costs: String::new(),
        },
        denylist: DenylistPolicy {
            source: String::new(),
        },
        maintenance: MaintenancePolicy {
            enabled: true,
            full_persist_interval: "24h".into(),
            optimize_check_interval: "12h".into(),
        },
        stats: StatsPolicy {
            recent_calls_capacity: 64,
        },
        provenance: Default::default(),
    }
}
