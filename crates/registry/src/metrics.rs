use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref LIVE_INSTANCES: IntGauge =
        IntGauge::new("appsearch_registry_live_instances", "Open per-user instances").unwrap();
    static ref UNLOCKED_USERS: IntGauge =
        IntGauge::new("appsearch_registry_unlocked_users", "Users known to be unlocked").unwrap();
    static ref INSTANCES_CREATED: IntCounter = IntCounter::new(
        "appsearch_registry_instances_created_total",
        "Per-user instances opened",
    )
    .unwrap();
    static ref INSTANCES_CLOSED: IntCounter = IntCounter::new(
        "appsearch_registry_instances_closed_total",
        "Per-user instances closed",
    )
    .unwrap();
    static ref INSTANCE_CREATE_FAILURES: IntCounter = IntCounter::new(
        "appsearch_registry_instance_create_failures_total",
        "Engine opens that failed",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register registry metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, LIVE_INSTANCES.clone());
    register(registry, UNLOCKED_USERS.clone());
    register(registry, INSTANCES_CREATED.clone());
    register(registry, INSTANCES_CLOSED.clone());
    register(registry, INSTANCE_CREATE_FAILURES.clone());
}

pub fn record_instance_created(live: usize) {
    INSTANCES_CREATED.inc();
    LIVE_INSTANCES.set(live as i64);
}

pub fn record_instance_closed(live: usize) {
    INSTANCES_CLOSED.inc();
    LIVE_INSTANCES.set(live as i64);
}

pub fn record_create_failure() {
    INSTANCE_CREATE_FAILURES.inc();
}

pub fn set_unlocked_users(count: usize) {
    UNLOCKED_USERS.set(count as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_twice_is_harmless() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        record_instance_created(1);
        assert!(registry
            .gather()
            .iter()
            .any(|family| family.get_name() == "appsearch_registry_live_instances"));
    }
}
