//! Service facade: one method per call type.
//!
//! Every method runs the admission gate, submits the operation to the target
//! user's executor and answers through the call's [`ResultCallback`]. Engine
//! work never happens on the calling thread.

use std::sync::Arc;
use std::time::Duration;

use appsearch_core_types::{
    prefixed_schema, AppSearchError, AppSearchResult, CallType, CallerIdentity,
};
use appsearch_registry::{
    Document, GetSchemaResponse, InstanceOptions, PerUserInstance, PersistMode, SearchHit,
    SearchSpec, SetSchemaRequest, SetSchemaResponse, StorageInfo, UserInstanceRegistry,
    UserLockTracker,
};
use appsearch_scheduler::{ExecutorPool, MaintenanceScheduler, SharedExecutor, TaskContext};
use appsearch_state_center::{CallStatsLogger, StatsSink};
use tracing::{debug, info, warn};

use crate::batch::BatchResult;
use crate::callback::ResultCallback;
use crate::environment::ServiceEnvironment;
use crate::gate::{Admission, AdmittedCall, CallAdmissionGate, CallRequest};
use crate::metrics;
use crate::timing::{CallTimer, OperationCounts};

/// What an operation sees while running on its user's executor.
pub struct Operation<'a> {
    pub instance: &'a PerUserInstance,
    pub caller: &'a CallerIdentity,
    /// The calling package; owner of everything a local call touches.
    pub package: &'a str,
    pub database: &'a str,
    pub task: &'a TaskContext,
}

impl Operation<'_> {
    fn ensure_active(&self) -> AppSearchResult<()> {
        self.task.ensure_active().map_err(AppSearchError::from)
    }
}

pub struct AppSearchService {
    pub(crate) env: ServiceEnvironment,
    pub(crate) locks: Arc<UserLockTracker>,
    pub(crate) registry: Arc<UserInstanceRegistry>,
    pub(crate) executors: Arc<ExecutorPool>,
    pub(crate) gate: CallAdmissionGate,
    pub(crate) maintenance: MaintenanceScheduler,
    pub(crate) shared: SharedExecutor,
    pub(crate) rejections: Arc<CallStatsLogger>,
}

impl AppSearchService {
    pub fn new(env: ServiceEnvironment) -> Self {
        let policy = env.policy.current();
        let snapshot = &policy.snapshot;
        let locks = Arc::new(UserLockTracker::new());
        let registry = Arc::new(UserInstanceRegistry::new(
            Arc::clone(&env.engines),
            Arc::clone(&env.oracle),
            InstanceOptions {
                recent_calls_capacity: snapshot.stats.recent_calls_capacity,
            },
        ));
        let executors = Arc::new(ExecutorPool::new(
            snapshot.executor.per_user_queue_capacity,
        ));
        let gate = CallAdmissionGate::new(
            Arc::clone(&env.platform),
            Arc::clone(&env.unlock_state),
            Arc::clone(&env.policy),
            Arc::clone(&locks),
            Arc::clone(&registry),
        );
        let maintenance = MaintenanceScheduler::new(env.runtime.clone());
        let shared = SharedExecutor::new(
            env.runtime.clone(),
            snapshot.executor.shared_worker_threads,
        );
        let rejections = Arc::new(CallStatsLogger::new(snapshot.stats.recent_calls_capacity));
        info!(
            rev = policy.rev,
            queue_capacity = executors.queue_capacity(),
            shared_workers = shared.workers(),
            "appsearch service constructed"
        );
        Self {
            env,
            locks,
            registry,
            executors,
            gate,
            maintenance,
            shared,
            rejections,
        }
    }

    pub fn locks(&self) -> &UserLockTracker {
        &self.locks
    }

    pub fn registry(&self) -> &UserInstanceRegistry {
        &self.registry
    }

    pub fn executors(&self) -> &ExecutorPool {
        &self.executors
    }

    pub fn gate(&self) -> &CallAdmissionGate {
        &self.gate
    }

    pub fn maintenance(&self) -> &MaintenanceScheduler {
        &self.maintenance
    }

    /// Calls rejected before reaching an executor.
    pub fn rejections(&self) -> &CallStatsLogger {
        &self.rejections
    }

    pub fn initialize(&self, request: CallRequest, callback: ResultCallback<()>) {
        self.execute(request, callback, |op| op.ensure_active());
    }

    pub fn set_schema(
        &self,
        request: CallRequest,
        schema: SetSchemaRequest,
        callback: ResultCallback<SetSchemaResponse>,
    ) {
        self.execute(request, callback, move |op| {
            let response = op
                .instance
                .engine()
                .set_schema(op.package, op.database, schema)?;
            if !response.deleted_types.is_empty() {
                info!(
                    package = op.package,
                    database = op.database,
                    deleted = ?response.deleted_types,
                    "schema types deleted"
                );
            }
            Ok(response)
        });
    }

    pub fn get_schema(&self, request: CallRequest, callback: ResultCallback<GetSchemaResponse>) {
        self.execute(request, callback, |op| {
            Ok(op.instance.engine().get_schema(op.package, op.database)?)
        });
    }

    pub fn get_namespaces(&self, request: CallRequest, callback: ResultCallback<Vec<String>>) {
        self.execute(request, callback, |op| {
            Ok(op.instance.engine().get_namespaces(op.package, op.database)?)
        });
    }

    /// Puts every document; failures are reported per document id.
    pub fn put_documents(
        &self,
        request: CallRequest,
        documents: Vec<Document>,
        callback: ResultCallback<BatchResult<String, ()>>,
    ) {
        self.execute(request, callback, move |op| {
            let engine = op.instance.engine();
            let mut batch = BatchResult::default();
            for document in documents {
                let id = document.id.clone();
                let outcome = op.ensure_active().and_then(|()| {
                    engine
                        .put_document(op.package, op.database, document)
                        .map_err(AppSearchError::from)
                });
                batch.record(id, outcome);
            }
            if let Err(err) = engine.persist_to_disk(PersistMode::Lite) {
                warn!(package = op.package, error = %err, "persist after put failed");
            }
            Ok(batch)
        });
    }

    pub fn get_documents(
        &self,
        request: CallRequest,
        namespace: String,
        ids: Vec<String>,
        callback: ResultCallback<BatchResult<String, Document>>,
    ) {
        self.execute(request, callback, move |op| {
            let engine = op.instance.engine();
            let mut batch = BatchResult::default();
            for id in ids {
                let outcome = engine
                    .get_document(op.package, op.database, &namespace, &id)
                    .map_err(AppSearchError::from);
                batch.record(id, outcome);
            }
            Ok(batch)
        });
    }

    pub fn query(
        &self,
        request: CallRequest,
        spec: SearchSpec,
        callback: ResultCallback<Vec<SearchHit>>,
    ) {
        self.execute(request, callback, move |op| {
            Ok(op.instance.engine().query(op.package, op.database, &spec)?)
        });
    }

    /// Searches every package, keeping only hits whose schema the caller may
    /// see.
    pub fn global_query(
        &self,
        request: CallRequest,
        spec: SearchSpec,
        callback: ResultCallback<Vec<SearchHit>>,
    ) {
        self.execute(request, callback, move |op| {
            let hits = op.instance.engine().global_query(&spec)?;
            let total = hits.len();
            let visible = hits
                .into_iter()
                .filter(|hit| {
                    op.instance
                        .is_visible(op.caller, &hit.package_name, &hit.prefixed_schema())
                });
            let visible: Vec<SearchHit> = if spec.limit == 0 {
                visible.collect()
            } else {
                visible.take(spec.limit).collect()
            };
            debug!(
                caller = op.caller.package_name(),
                total,
                visible = visible.len(),
                "global query filtered"
            );
            Ok(visible)
        });
    }

    /// Documents of another package; ids the caller may not see read as
    /// missing.
    pub fn global_get_documents(
        &self,
        request: CallRequest,
        target_package: String,
        target_database: String,
        namespace: String,
        ids: Vec<String>,
        callback: ResultCallback<BatchResult<String, Document>>,
    ) {
        self.execute(request, callback, move |op| {
            let engine = op.instance.engine();
            let mut batch = BatchResult::default();
            for id in ids {
                let outcome = engine
                    .get_document(&target_package, &target_database, &namespace, &id)
                    .map_err(AppSearchError::from)
                    .and_then(|document| {
                        let schema = prefixed_schema(
                            &target_package,
                            &target_database,
                            &document.schema_type,
                        );
                        if op.instance.is_visible(op.caller, &target_package, &schema) {
                            Ok(document)
                        } else {
                            Err(AppSearchError::not_found(format!("document ({namespace}, {id})")))
                        }
                    });
                batch.record(id, outcome);
            }
            Ok(batch)
        });
    }

    /// Schema of another package, reduced to the types the caller may see.
    /// Visibility settings are only returned to the owner.
    pub fn global_get_schema(
        &self,
        request: CallRequest,
        target_package: String,
        target_database: String,
        callback: ResultCallback<GetSchemaResponse>,
    ) {
        self.execute(request, callback, move |op| {
            let mut response = op
                .instance
                .engine()
                .get_schema(&target_package, &target_database)?;
            response.schemas.retain(|schema| {
                let prefixed = prefixed_schema(&target_package, &target_database, &schema.name);
                op.instance.is_visible(op.caller, &target_package, &prefixed)
            });
            if op.caller.has_self_access(&target_package) {
                let kept: Vec<&str> = response.schemas.iter().map(|s| s.name.as_str()).collect();
                response
                    .visibility
                    .retain(|name, _| kept.contains(&name.as_str()));
            } else {
                response.visibility.clear();
            }
            Ok(response)
        });
    }

    pub fn remove_by_document_id(
        &self,
        request: CallRequest,
        namespace: String,
        ids: Vec<String>,
        callback: ResultCallback<BatchResult<String, ()>>,
    ) {
        self.execute(request, callback, move |op| {
            let engine = op.instance.engine();
            let mut batch = BatchResult::default();
            for id in ids {
                let outcome = op.ensure_active().and_then(|()| {
                    engine
                        .remove(op.package, op.database, &namespace, &id)
                        .map_err(AppSearchError::from)
                });
                batch.record(id, outcome);
            }
            optimize_if_needed(op);
            Ok(batch)
        });
    }

    /// Returns the number of documents removed.
    pub fn remove_by_query(
        &self,
        request: CallRequest,
        spec: SearchSpec,
        callback: ResultCallback<usize>,
    ) {
        self.execute(request, callback, move |op| {
            let removed = op
                .instance
                .engine()
                .remove_by_query(op.package, op.database, &spec)?;
            optimize_if_needed(op);
            Ok(removed)
        });
    }

    pub fn persist_to_disk(
        &self,
        request: CallRequest,
        mode: PersistMode,
        callback: ResultCallback<()>,
    ) {
        self.execute(request, callback, move |op| {
            Ok(op.instance.engine().persist_to_disk(mode)?)
        });
    }

    pub fn get_storage_info(&self, request: CallRequest, callback: ResultCallback<StorageInfo>) {
        self.execute(request, callback, |op| {
            Ok(op
                .instance
                .engine()
                .storage_info(op.package, Some(op.database))?)
        });
    }

    fn execute<T, F>(&self, request: CallRequest, callback: ResultCallback<T>, operation: F)
    where
        T: OperationCounts + Default + Send + 'static,
        F: for<'a> FnOnce(&Operation<'a>) -> AppSearchResult<T> + Send + 'static,
    {
        let mut timer = CallTimer::start(
            request.call_type,
            &request.package_name,
            request.database.as_deref(),
            request.user,
        );
        if needs_database(request.call_type) && request.database.is_none() {
            let err = AppSearchError::invalid_argument(format!(
                "{} requires a database name",
                request.call_type
            ));
            metrics::record_rejected(request.call_type, err.kind());
            self.reject(timer, &callback, err);
            return;
        }

        let admitted = match self.gate.admit(&request) {
            Ok(Admission::Admitted(call)) => call,
            Ok(Admission::EnterpriseUnavailable) => {
                debug!(call = %request.call_type, "enterprise call answered empty");
                callback.send(Ok(T::default()));
                return;
            }
            Err(err) => {
                self.reject(timer, &callback, err);
                return;
            }
        };
        let AdmittedCall {
            caller,
            user,
            instance,
            permit,
        } = admitted;
        timer.retarget(user);
        timer.admitted();

        let call_type = request.call_type;
        let package = request.package_name;
        let database = request.database.unwrap_or_default();
        let sink = Arc::clone(&self.env.notifications);
        let fallback = timer.clone();
        let answer = callback.clone();
        let submitted = self.executors.submit_linked(
            user,
            call_type.as_str(),
            request.disconnect,
            move |ctx| {
                let mut timer = timer;
                timer.started(ctx.timeline());
                let result = match ctx.ensure_active() {
                    Err(err) => Err(AppSearchError::from(err)),
                    Ok(()) => operation(&Operation {
                        instance: &instance,
                        caller: &caller,
                        package: &package,
                        database: &database,
                        task: &ctx,
                    }),
                };
                if call_type.is_mutation() && !ctx.is_shutting_down() {
                    let changes = instance.engine().dispatch_and_clear_change_notifications();
                    if !changes.is_empty() {
                        sink.deliver(user, changes);
                    }
                }
                let stats = timer.finish(&result);
                metrics::observe_call(call_type, Duration::from_millis(stats.total_latency_ms));
                instance.stats().record(stats);
                drop(permit);
                answer.send(result);
            },
        );
        if let Err(err) = submitted {
            let err = AppSearchError::from(err);
            metrics::record_rejected(call_type, err.kind());
            self.reject(fallback, &callback, err);
        }
    }

    fn reject<T>(&self, timer: CallTimer, callback: &ResultCallback<T>, err: AppSearchError) {
        let result: AppSearchResult<()> = Err(err);
        let stats = timer.finish(&result);
        if let Err(err) = result {
            if matches!(err, AppSearchError::Denied(_)) {
                info!(
                    call = %stats.call_type,
                    package = %stats.package_name,
                    database = ?stats.database,
                    "call blocked by denylist"
                );
            }
            self.rejections.record(stats);
            callback.send(Err(err));
        }
    }
}

fn needs_database(call: CallType) -> bool {
    matches!(
        call,
        CallType::SetSchema
            | CallType::GetSchema
            | CallType::GetNamespaces
            | CallType::PutDocuments
            | CallType::GetDocuments
            | CallType::Search
            | CallType::RemoveByDocumentId
            | CallType::RemoveBySearch
            | CallType::GetStorageInfo
    )
}

fn optimize_if_needed(op: &Operation<'_>) {
    match op.instance.engine().check_for_optimize() {
        Ok(true) => info!(user = %op.instance.user(), "index optimized after removal"),
        Ok(false) => {}
        Err(err) => warn!(user = %op.instance.user(), error = %err, "optimize check failed"),
    }
}
