//! Reactions to user and package lifecycle events.

use std::sync::Arc;

use appsearch_core_types::{AppSearchError, AppSearchResult, UserHandle};
use appsearch_registry::{PersistMode, StorageInfo};
use appsearch_scheduler::{MaintenanceKind, MaintenanceRun};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::service::AppSearchService;

impl AppSearchService {
    /// Credential storage of `user` became available: open its executor and
    /// instance, drop data of uninstalled packages and start maintenance.
    pub fn on_user_unlocking(&self, user: UserHandle) {
        self.locks.mark_unlocked(user);
        let queue_capacity = self.env.policy.current().snapshot.executor.per_user_queue_capacity;
        if let Err(err) = self.executors.open_with_capacity(user, queue_capacity) {
            error!(%user, error = %err, "failed to open user executor");
            return;
        }
        let instance = match self.registry.get_or_create(user) {
            Ok(instance) => instance,
            Err(err) => {
                error!(%user, error = %err, "failed to open user instance");
                return;
            }
        };
        if let Some(parent) = self.env.platform.managed_profile_parent(user) {
            self.locks.set_enterprise_pair(parent, user);
        }

        let platform = Arc::clone(&self.env.platform);
        let pruned = self.executors.submit(user, "prune_packages", move |ctx| {
            if ctx.is_cancelled() {
                return;
            }
            let installed = platform.installed_packages(user);
            match instance.engine().prune_package_data(&installed) {
                Ok(pruned) if !pruned.is_empty() => {
                    info!(%user, packages = ?pruned, "pruned data of uninstalled packages")
                }
                Ok(_) => {}
                Err(err) => warn!(%user, error = %err, "package pruning failed"),
            }
        });
        if let Err(err) = pruned {
            warn!(%user, error = %err, "could not schedule package pruning");
        }

        self.schedule_maintenance(user);
        info!(%user, "user unlocked");
    }

    /// Tears down everything held for `user`. Safe to call repeatedly.
    pub fn on_user_stopping(&self, user: UserHandle) {
        self.locks.mark_locked(user);
        let cancelled = self.maintenance.cancel_user(user);
        let stopped = self.executors.shutdown(user);
        let closed = self.registry.close_and_remove(user);
        if stopped || closed || cancelled > 0 {
            info!(%user, cancelled, stopped, closed, "user stopped");
        } else {
            debug!(%user, "user already stopped");
        }
    }

    pub fn on_user_removed(&self, user: UserHandle) {
        self.on_user_stopping(user);
        self.executors.forget(user);
        self.registry.forget(user);
        self.locks.clear_enterprise_for(user);
        info!(%user, "user removed");
    }

    /// Clears what `package` stored for `user`, on that user's executor.
    pub fn on_package_removed(&self, package: &str, user: UserHandle) {
        let Some(instance) = self.registry.find(user) else {
            debug!(%user, package, "package removed for user without instance");
            return;
        };
        let package = package.to_string();
        let submitted = self.executors.submit(user, "clear_package_data", move |ctx| {
            if ctx.is_cancelled() {
                return;
            }
            match instance.engine().clear_package_data(&package) {
                Ok(()) => info!(%user, package = %package, "package data cleared"),
                Err(err) => {
                    warn!(%user, package = %package, error = %err, "clearing package data failed")
                }
            }
        });
        if let Err(err) = submitted {
            warn!(%user, error = %err, "could not schedule package data removal");
        }
    }

    /// Storage used by `packages` in `user`, summed. Runs on the shared
    /// executor; users without an instance report nothing stored.
    pub async fn storage_info_for_packages(
        &self,
        user: UserHandle,
        packages: Vec<String>,
    ) -> AppSearchResult<StorageInfo> {
        let Some(instance) = self.registry.find(user) else {
            return Ok(StorageInfo::default());
        };
        let job = self.shared.spawn(move || {
            let mut total = StorageInfo::default();
            for package in &packages {
                total.merge(instance.engine().storage_info(package, None)?);
            }
            Ok::<_, AppSearchError>(total)
        });
        match job.await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(err.into()),
            Err(err) => Err(AppSearchError::internal(format!(
                "storage info job failed: {err}"
            ))),
        }
    }

    /// Stops maintenance, drains every executor and closes every instance.
    pub fn shutdown(&self) {
        self.maintenance.cancel_all();
        self.executors.shutdown_all();
        for user in self.registry.users() {
            self.registry.close_and_remove(user);
        }
        info!("appsearch service shut down");
    }

    fn schedule_maintenance(&self, user: UserHandle) {
        let policy = self.env.policy.current();
        let maintenance = &policy.snapshot.maintenance;
        if !maintenance.enabled {
            debug!(%user, "maintenance disabled by policy");
            return;
        }
        for kind in MaintenanceKind::ALL {
            let interval = match kind {
                MaintenanceKind::FullPersist => maintenance.full_persist_interval(),
                MaintenanceKind::CheckForOptimize => maintenance.optimize_check_interval(),
            };
            match interval {
                Ok(interval) => {
                    self.maintenance.schedule_periodic(
                        user,
                        kind,
                        interval,
                        self.maintenance_run(user, kind),
                    );
                }
                Err(err) => warn!(%user, %kind, error = %err, "maintenance not scheduled"),
            }
        }
    }

    /// Each run is a task on the user's executor, so it never overlaps a call.
    pub(crate) fn maintenance_run(
        &self,
        user: UserHandle,
        kind: MaintenanceKind,
    ) -> MaintenanceRun {
        let executors = Arc::clone(&self.executors);
        let registry = Arc::clone(&self.registry);
        Arc::new(move |token: CancellationToken| {
            if token.is_cancelled() {
                return;
            }
            let registry = Arc::clone(&registry);
            let submitted = executors.submit_linked(user, kind.as_str(), Some(token), move |ctx| {
                if ctx.ensure_active().is_err() {
                    return;
                }
                let Some(instance) = registry.find(user) else {
                    return;
                };
                let outcome = match kind {
                    MaintenanceKind::FullPersist => {
                        instance.engine().persist_to_disk(PersistMode::Full)
                    }
                    MaintenanceKind::CheckForOptimize => {
                        instance.engine().check_for_optimize().map(|optimized| {
                            if optimized {
                                info!(%user, "periodic optimize ran");
                            }
                        })
                    }
                };
                if let Err(err) = outcome {
                    warn!(%user, %kind, error = %err, "maintenance run failed");
                }
            });
            if let Err(err) = submitted {
                debug!(%user, %kind, error = %err, "maintenance run skipped");
            }
        })
    }
}
