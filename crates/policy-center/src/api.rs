use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::errors::PolicyError;
use crate::model::{PolicySource, PolicyView, RuntimeOverrideSpec, ServicePolicySnapshot};
use crate::override_store::RuntimeOverrideStore;

#[async_trait]
pub trait PolicyCenter: Send + Sync {
    /// Current view. Never blocks; callers keep the returned `Arc` for the
    /// duration of one decision.
    fn current(&self) -> Arc<PolicyView>;
    /// Replaces the base configuration, keeping active runtime overrides.
    async fn reload(&self, snapshot: ServicePolicySnapshot) -> Result<(), PolicyError>;
    async fn apply_override(&self, override_spec: RuntimeOverrideSpec) -> Result<(), PolicyError>;
    fn subscribe(&self) -> watch::Receiver<Arc<PolicyView>>;
}

struct PolicyState {
    base: ServicePolicySnapshot,
    overrides: RuntimeOverrideStore,
    rev_counter: u64,
}

impl PolicyState {
    fn new(base: ServicePolicySnapshot) -> Self {
        let rev_counter = base.rev;
        Self {
            base,
            overrides: RuntimeOverrideStore::default(),
            rev_counter,
        }
    }

    fn recompute(&mut self) -> Result<PolicyView, PolicyError> {
        let mut snapshot = self.base.clone();
        for (path, value) in self.overrides.active_entries() {
            apply_override_to_snapshot(
                &mut snapshot,
                &path,
                &value,
                PolicySource::RuntimeOverride,
            )?;
        }
        self.rev_counter = self.rev_counter.saturating_add(1);
        snapshot.rev = self.rev_counter;
        Ok(PolicyView::from(snapshot))
    }
}

struct Publisher {
    view: ArcSwap<PolicyView>,
    watch_tx: watch::Sender<Arc<PolicyView>>,
}

impl Publisher {
    fn publish(&self, view: PolicyView) {
        let view = Arc::new(view);
        self.view.store(Arc::clone(&view));
        // No subscribers is fine; readers use `current()`.
        let _ = self.watch_tx.send(view);
    }
}

/// Copy-on-write policy holder: writers serialize on a mutex and swap in a
/// fresh view, readers load the view without locking.
pub struct InMemoryPolicyCenter {
    state: Arc<Mutex<PolicyState>>,
    publisher: Arc<Publisher>,
}

impl InMemoryPolicyCenter {
    pub fn new(snapshot: ServicePolicySnapshot) -> Self {
        let state = PolicyState::new(snapshot.clone());
        let initial = Arc::new(PolicyView::from(snapshot));
        let (watch_tx, _watch_rx) = watch::channel(Arc::clone(&initial));
        Self {
            state: Arc::new(Mutex::new(state)),
            publisher: Arc::new(Publisher {
                view: ArcSwap::new(initial),
                watch_tx,
            }),
        }
    }
}

#[async_trait]
impl PolicyCenter for InMemoryPolicyCenter {
    fn current(&self) -> Arc<PolicyView> {
        self.publisher.view.load_full()
    }

    async fn reload(&self, snapshot: ServicePolicySnapshot) -> Result<(), PolicyError> {
        let mut guard = self.state.lock().await;
        guard.base = snapshot;
        let view = guard.recompute()?;
        info!(rev = view.rev, "service policy reloaded");
        self.publisher.publish(view);
        Ok(())
    }

    async fn apply_override(&self, override_spec: RuntimeOverrideSpec) -> Result<(), PolicyError> {
        let ttl = if override_spec.ttl_seconds > 0 {
            Some(Duration::from_secs(override_spec.ttl_seconds))
        } else {
            None
        };

        // Validate against a scratch copy so a bad value never reaches the store.
        let mut scratch = self.current().snapshot.clone();
        apply_override_to_snapshot(
            &mut scratch,
            &override_spec.path,
            &override_spec.value,
            PolicySource::RuntimeOverride,
        )?;

        let mut guard = self.state.lock().await;
        let replaced = guard.overrides.insert(
            override_spec.path.clone(),
            override_spec.value.clone(),
            override_spec.owner.clone(),
            ttl,
        );
        if let Some(previous) = replaced.filter(|previous| *previous != override_spec.owner) {
            warn!(
                path = %override_spec.path,
                previous_owner = %previous,
                owner = %override_spec.owner,
                "policy override taken over from another owner"
            );
        }
        let view = guard.recompute()?;
        drop(guard);
        info!(
            path = %override_spec.path,
            owner = %override_spec.owner,
            reason = %override_spec.reason,
            rev = view.rev,
            "policy override applied"
        );
        self.publisher.publish(view);

        if let Some(ttl) = ttl {
            let state = Arc::clone(&self.state);
            let publisher = Arc::clone(&self.publisher);
            let path = override_spec.path;
            tokio::spawn(async move {
                sleep(ttl).await;
                let mut guard = state.lock().await;
                if guard.overrides.remove(&path) {
                    match guard.recompute() {
                        Ok(view) => {
                            drop(guard);
                            publisher.publish(view);
                        }
                        Err(err) => warn!("policy override expiry recompute failed: {err}"),
                    }
                }
            });
        }

        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Arc<PolicyView>> {
        self.publisher.watch_tx.subscribe()
    }
}

pub(crate) fn apply_override_to_snapshot(
    snapshot: &mut ServicePolicySnapshot,
    path: &str,
    value: &Value,
    source: PolicySource,
) -> Result<(), PolicyError> {
    let changed = match path {
        "executor.per_user_queue_capacity" => {
            merge(&mut snapshot.executor.per_user_queue_capacity, to_positive_usize(value)?)
        }
        "executor.shared_worker_threads" => {
            merge(&mut snapshot.executor.shared_worker_threads, to_positive_usize(value)?)
        }
        "rate_limit.enabled" => merge(&mut snapshot.rate_limit.enabled, to_bool(value)?),
        "rate_limit.total_capacity" => {
            merge(&mut snapshot.rate_limit.total_capacity, to_u32(value)?)
        }
        "rate_limit.per_package_percentage" => merge(
            &mut snapshot.rate_limit.per_package_percentage,
            to_fraction(value)?,
        ),
        "rate_limit.api_costs" => merge(&mut snapshot.rate_limit.api_costs, to_string(value)?),
        "denylist.source" => merge(&mut snapshot.denylist.source, to_string(value)?),
        "maintenance.enabled" => merge(&mut snapshot.maintenance.enabled, to_bool(value)?),
        "maintenance.full_persist_interval" => merge(
            &mut snapshot.maintenance.full_persist_interval,
            to_interval(value)?,
        ),
        "maintenance.optimize_check_interval" => merge(
            &mut snapshot.maintenance.optimize_check_interval,
            to_interval(value)?,
        ),
        "stats.recent_calls_capacity" => {
            merge(&mut snapshot.stats.recent_calls_capacity, to_positive_usize(value)?)
        }
        path => return Err(PolicyError::UnsupportedPath(path.to_string())),
    };
    if changed || source == PolicySource::Builtin {
        snapshot.set_provenance(path, source);
    }
    Ok(())
}

fn merge<T: PartialEq>(target: &mut T, candidate: T) -> bool {
    if *target == candidate {
        return false;
    }
    *target = candidate;
    true
}

fn to_u64(value: &Value) -> Result<u64, PolicyError> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
        .ok_or_else(|| PolicyError::InvalidValue(format!("expected integer, got {value}")))
}

fn to_positive_usize(value: &Value) -> Result<usize, PolicyError> {
    match to_u64(value)? {
        0 => Err(PolicyError::InvalidValue("value must be positive".into())),
        v => usize::try_from(v)
            .map_err(|_| PolicyError::InvalidValue(format!("value {v} exceeds usize"))),
    }
}

fn to_u32(value: &Value) -> Result<u32, PolicyError> {
    let raw = to_u64(value)?;
    u32::try_from(raw).map_err(|_| PolicyError::InvalidValue(format!("value {raw} exceeds u32")))
}

fn to_fraction(value: &Value) -> Result<f32, PolicyError> {
    let raw = value
        .as_f64()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
        .ok_or_else(|| PolicyError::InvalidValue(format!("expected number, got {value}")))?;
    if raw > 0.0 && raw <= 1.0 {
        Ok(raw as f32)
    } else {
        Err(PolicyError::InvalidValue(format!(
            "percentage {raw} outside (0, 1]"
        )))
    }
}

fn to_bool(value: &Value) -> Result<bool, PolicyError> {
    value
        .as_bool()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
        .ok_or_else(|| PolicyError::InvalidValue(format!("expected bool, got {value}")))
}

fn to_string(value: &Value) -> Result<String, PolicyError> {
    match value {
        Value::String(raw) => Ok(raw.clone()),
        Value::Null => Ok(String::new()),
        other => Err(PolicyError::InvalidValue(format!(
            "expected string, got {other}"
        ))),
    }
}

fn to_interval(value: &Value) -> Result<String, PolicyError> {
    let raw = to_string(value)?;
    humantime::parse_duration(raw.trim())
        .map_err(|err| PolicyError::InvalidValue(format!("invalid interval '{raw}': {err}")))?;
    Ok(raw)
}
