//! In-process engine used by tests and by hosts without a native index.
//!
//! Data of a user outlives individual handles: the factory keeps one store per
//! user, so closing a handle on lock and opening a new one on unlock sees the
//! same documents, as an on-disk index would.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use appsearch_core_types::{prefixed_schema, UserHandle, VISIBILITY_STORE_PACKAGE};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use visibility_checker::{CompiledVisibility, SchemaVisibility, VisibilityConfigStore};

use crate::engine::{
    ChangeNotification, Document, Engine, EngineError, EngineFactory, GetSchemaResponse,
    PersistMode, SchemaType, SearchHit, SearchSpec, SetSchemaRequest, SetSchemaResponse,
    StorageInfo,
};

type DatabaseKey = (String, String);
type DocumentKey = (String, String);
type ChangeKey = (String, String, String, String);

#[derive(Debug, Default)]
struct DatabaseData {
    version: u32,
    schemas: BTreeMap<String, SchemaType>,
    visibility: HashMap<String, SchemaVisibility>,
    documents: BTreeMap<DocumentKey, Document>,
}

impl DatabaseData {
    fn has_documents_of(&self, schema_type: &str) -> bool {
        self.documents
            .values()
            .any(|document| document.schema_type == schema_type)
    }
}

#[derive(Debug, Default)]
struct StoreData {
    databases: BTreeMap<DatabaseKey, DatabaseData>,
    pending_changes: BTreeMap<ChangeKey, BTreeSet<String>>,
    deleted_since_optimize: usize,
    persist_log: Vec<PersistMode>,
    optimize_runs: usize,
}

impl StoreData {
    fn record_change(&mut self, package: &str, database: &str, document: &Document) {
        self.pending_changes
            .entry((
                package.to_string(),
                database.to_string(),
                document.namespace.clone(),
                document.schema_type.clone(),
            ))
            .or_default()
            .insert(document.id.clone());
    }
}

/// Storage shared by every handle opened for one user.
#[derive(Debug, Default)]
struct MemoryDisk {
    data: Mutex<StoreData>,
    compiled: RwLock<HashMap<String, Arc<CompiledVisibility>>>,
}

pub struct MemoryEngine {
    user: UserHandle,
    disk: Arc<MemoryDisk>,
    closed: AtomicBool,
    optimize_threshold: usize,
}

impl MemoryEngine {
    pub fn new(user: UserHandle) -> Self {
        Self::with_disk(user, Arc::new(MemoryDisk::default()), DEFAULT_OPTIMIZE_THRESHOLD)
    }

    fn with_disk(user: UserHandle, disk: Arc<MemoryDisk>, optimize_threshold: usize) -> Self {
        Self {
            user,
            disk,
            closed: AtomicBool::new(false),
            optimize_threshold: optimize_threshold.max(1),
        }
    }

    pub fn user(&self) -> UserHandle {
        self.user
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn persist_log(&self) -> Vec<PersistMode> {
        self.disk.data.lock().persist_log.clone()
    }

    pub fn optimize_runs(&self) -> usize {
        self.disk.data.lock().optimize_runs
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    fn recompile(&self, package: &str, database: &str, data: &DatabaseData) {
        let prefix = prefixed_schema(package, database, "");
        let mut compiled = self.disk.compiled.write();
        compiled.retain(|key, _| !key.starts_with(&prefix));
        for name in data.schemas.keys() {
            let visibility = data.visibility.get(name).cloned().unwrap_or_default();
            compiled.insert(
                prefixed_schema(package, database, name),
                Arc::new(CompiledVisibility::compile(&visibility)),
            );
        }
    }

    fn forget_package(&self, data: &mut StoreData, package: &str) {
        data.databases.retain(|(owner, _), _| owner != package);
        data.pending_changes.retain(|(owner, ..), _| owner != package);
        let prefix = format!("{package}$");
        self.disk
            .compiled
            .write()
            .retain(|key, _| !key.starts_with(&prefix));
    }
}

const DEFAULT_OPTIMIZE_THRESHOLD: usize = 1_000;

fn validate_schema(request: &SetSchemaRequest) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for schema in &request.schemas {
        if schema.name.trim().is_empty() {
            return Err(EngineError::InvalidArgument("schema type name is empty".into()));
        }
        if !seen.insert(schema.name.as_str()) {
            return Err(EngineError::InvalidArgument(format!(
                "duplicate schema type {}",
                schema.name
            )));
        }
    }
    if let Some(unknown) = request
        .visibility
        .keys()
        .find(|name| !seen.contains(name.as_str()))
    {
        return Err(EngineError::InvalidArgument(format!(
            "visibility set for unknown schema type {unknown}"
        )));
    }
    Ok(())
}

impl VisibilityConfigStore for MemoryEngine {
    fn visibility(&self, prefixed_schema: &str) -> Option<Arc<CompiledVisibility>> {
        self.disk.compiled.read().get(prefixed_schema).cloned()
    }
}

impl Engine for MemoryEngine {
    fn set_schema(
        &self,
        package: &str,
        database: &str,
        request: SetSchemaRequest,
    ) -> Result<SetSchemaResponse, EngineError> {
        self.ensure_open()?;
        validate_schema(&request)?;
        let mut data = self.disk.data.lock();
        let key = (package.to_string(), database.to_string());
        let existing = data.databases.entry(key.clone()).or_default();

        let incoming: HashMap<&str, &SchemaType> = request
            .schemas
            .iter()
            .map(|schema| (schema.name.as_str(), schema))
            .collect();
        let deleted_types: BTreeSet<String> = existing
            .schemas
            .keys()
            .filter(|name| !incoming.contains_key(name.as_str()))
            .cloned()
            .collect();

        let mut incompatible_types = BTreeSet::new();
        for name in &deleted_types {
            if existing.has_documents_of(name) {
                incompatible_types.insert(name.clone());
            }
        }
        for (name, schema) in &incoming {
            let required: Vec<&str> = schema.required_properties().collect();
            let breaks_documents = existing.documents.values().any(|document| {
                document.schema_type == *name
                    && required
                        .iter()
                        .any(|property| !document.properties.contains_key(*property))
            });
            if breaks_documents {
                incompatible_types.insert(name.to_string());
            }
        }

        if !incompatible_types.is_empty() && !request.force_override {
            return Err(EngineError::SchemaIncompatible(
                incompatible_types.into_iter().collect::<Vec<_>>().join(", "),
            ));
        }

        let mut dropped = 0;
        existing.documents.retain(|_, document| {
            let keep = !deleted_types.contains(&document.schema_type)
                && !incompatible_types.contains(&document.schema_type);
            if !keep {
                dropped += 1;
            }
            keep
        });
        existing.schemas = request
            .schemas
            .into_iter()
            .map(|schema| (schema.name.clone(), schema))
            .collect();
        existing.visibility = request.visibility;
        existing.version = request.version;
        self.recompile(package, database, existing);

        if existing.schemas.is_empty() && existing.documents.is_empty() {
            data.databases.remove(&key);
        }
        data.deleted_since_optimize += dropped;
        debug!(
            user = %self.user,
            package,
            database,
            deleted = deleted_types.len(),
            dropped_documents = dropped,
            "schema set"
        );
        Ok(SetSchemaResponse {
            deleted_types,
            incompatible_types,
        })
    }

    fn get_schema(&self, package: &str, database: &str) -> Result<GetSchemaResponse, EngineError> {
        self.ensure_open()?;
        let data = self.disk.data.lock();
        let Some(db) = data
            .databases
            .get(&(package.to_string(), database.to_string()))
        else {
            return Ok(GetSchemaResponse::default());
        };
        Ok(GetSchemaResponse {
            version: db.version,
            schemas: db.schemas.values().cloned().collect(),
            visibility: db.visibility.clone(),
        })
    }

    fn schema_types_of(&self, package: &str) -> Result<Vec<String>, EngineError> {
        self.ensure_open()?;
        let data = self.disk.data.lock();
        Ok(data
            .databases
            .iter()
            .filter(|((owner, _), _)| owner == package)
            .flat_map(|((owner, database), db)| {
                db.schemas
                    .keys()
                    .map(move |name| prefixed_schema(owner, database, name))
            })
            .collect())
    }

    fn get_namespaces(&self, package: &str, database: &str) -> Result<Vec<String>, EngineError> {
        self.ensure_open()?;
        let data = self.disk.data.lock();
        let namespaces: BTreeSet<String> = data
            .databases
            .get(&(package.to_string(), database.to_string()))
            .map(|db| db.documents.keys().map(|(namespace, _)| namespace.clone()).collect())
            .unwrap_or_default();
        Ok(namespaces.into_iter().collect())
    }

    fn put_document(
        &self,
        package: &str,
        database: &str,
        document: Document,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        if document.id.is_empty() {
            return Err(EngineError::InvalidArgument("document id is empty".into()));
        }
        let mut data = self.disk.data.lock();
        let db = data
            .databases
            .get_mut(&(package.to_string(), database.to_string()))
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!(
                    "schema type {} is not set in {database}",
                    document.schema_type
                ))
            })?;
        let schema = db.schemas.get(&document.schema_type).ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "schema type {} is not set in {database}",
                document.schema_type
            ))
        })?;
        if let Some(missing) = schema
            .required_properties()
            .find(|property| !document.properties.contains_key(*property))
        {
            return Err(EngineError::InvalidArgument(format!(
                "document {} lacks required property {missing}",
                document.id
            )));
        }
        let replaced = db
            .documents
            .insert(
                (document.namespace.clone(), document.id.clone()),
                document.clone(),
            )
            .is_some();
        if replaced {
            data.deleted_since_optimize += 1;
        }
        data.record_change(package, database, &document);
        Ok(())
    }

    fn get_document(
        &self,
        package: &str,
        database: &str,
        namespace: &str,
        id: &str,
    ) -> Result<Document, EngineError> {
        self.ensure_open()?;
        let data = self.disk.data.lock();
        data.databases
            .get(&(package.to_string(), database.to_string()))
            .and_then(|db| db.documents.get(&(namespace.to_string(), id.to_string())))
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("document ({namespace}, {id})")))
    }

    fn query(
        &self,
        package: &str,
        database: &str,
        spec: &SearchSpec,
    ) -> Result<Vec<SearchHit>, EngineError> {
        self.ensure_open()?;
        let data = self.disk.data.lock();
        let Some(db) = data
            .databases
            .get(&(package.to_string(), database.to_string()))
        else {
            return Ok(Vec::new());
        };
        let hits = db
            .documents
            .values()
            .filter(|document| spec.accepts(document))
            .map(|document| SearchHit {
                package_name: package.to_string(),
                database: database.to_string(),
                document: document.clone(),
            });
        Ok(if spec.limit == 0 {
            hits.collect()
        } else {
            hits.take(spec.limit).collect()
        })
    }

    fn global_query(&self, spec: &SearchSpec) -> Result<Vec<SearchHit>, EngineError> {
        self.ensure_open()?;
        let data = self.disk.data.lock();
        Ok(data
            .databases
            .iter()
            .flat_map(|((package, database), db)| {
                db.documents
                    .values()
                    .filter(|document| spec.accepts(document))
                    .map(move |document| SearchHit {
                        package_name: package.clone(),
                        database: database.clone(),
                        document: document.clone(),
                    })
            })
            .collect())
    }

    fn remove(
        &self,
        package: &str,
        database: &str,
        namespace: &str,
        id: &str,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut data = self.disk.data.lock();
        let removed = data
            .databases
            .get_mut(&(package.to_string(), database.to_string()))
            .and_then(|db| db.documents.remove(&(namespace.to_string(), id.to_string())))
            .ok_or_else(|| EngineError::NotFound(format!("document ({namespace}, {id})")))?;
        data.deleted_since_optimize += 1;
        data.record_change(package, database, &removed);
        Ok(())
    }

    fn remove_by_query(
        &self,
        package: &str,
        database: &str,
        spec: &SearchSpec,
    ) -> Result<usize, EngineError> {
        self.ensure_open()?;
        let mut data = self.disk.data.lock();
        let mut removed = Vec::new();
        if let Some(db) = data
            .databases
            .get_mut(&(package.to_string(), database.to_string()))
        {
            db.documents.retain(|_, document| {
                if spec.accepts(document) {
                    removed.push(document.clone());
                    false
                } else {
                    true
                }
            });
        }
        data.deleted_since_optimize += removed.len();
        for document in &removed {
            data.record_change(package, database, document);
        }
        Ok(removed.len())
    }

    fn persist_to_disk(&self, mode: PersistMode) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.disk.data.lock().persist_log.push(mode);
        Ok(())
    }

    fn check_for_optimize(&self) -> Result<bool, EngineError> {
        self.ensure_open()?;
        let mut data = self.disk.data.lock();
        if data.deleted_since_optimize < self.optimize_threshold {
            return Ok(false);
        }
        data.deleted_since_optimize = 0;
        data.optimize_runs += 1;
        info!(user = %self.user, "memory engine optimized");
        Ok(true)
    }

    fn storage_info(
        &self,
        package: &str,
        database: Option<&str>,
    ) -> Result<StorageInfo, EngineError> {
        self.ensure_open()?;
        let data = self.disk.data.lock();
        let mut info = StorageInfo::default();
        for ((owner, name), db) in &data.databases {
            if owner != package || database.is_some_and(|wanted| wanted != name) {
                continue;
            }
            let namespaces: BTreeSet<&str> =
                db.documents.keys().map(|(namespace, _)| namespace.as_str()).collect();
            info.merge(StorageInfo {
                size_bytes: db.documents.values().map(Document::approximate_size).sum(),
                alive_documents: db.documents.len() as u64,
                alive_namespaces: namespaces.len() as u64,
            });
        }
        Ok(info)
    }

    fn dispatch_and_clear_change_notifications(&self) -> Vec<ChangeNotification> {
        let pending = std::mem::take(&mut self.disk.data.lock().pending_changes);
        pending
            .into_iter()
            .map(
                |((package_name, database, namespace, schema_type), document_ids)| {
                    ChangeNotification {
                        package_name,
                        database,
                        namespace,
                        schema_type,
                        document_ids,
                    }
                },
            )
            .collect()
    }

    fn clear_package_data(&self, package: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut data = self.disk.data.lock();
        self.forget_package(&mut data, package);
        debug!(user = %self.user, package, "package data cleared");
        Ok(())
    }

    fn prune_package_data(&self, installed: &HashSet<String>) -> Result<Vec<String>, EngineError> {
        self.ensure_open()?;
        let mut data = self.disk.data.lock();
        let stale: BTreeSet<String> = data
            .databases
            .keys()
            .map(|(package, _)| package.clone())
            .filter(|package| package != VISIBILITY_STORE_PACKAGE && !installed.contains(package))
            .collect();
        for package in &stale {
            self.forget_package(&mut data, package);
        }
        Ok(stale.into_iter().collect())
    }

    fn close(&self) -> Result<(), EngineError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(user = %self.user, "memory engine closed");
        }
        Ok(())
    }
}

/// Opens [`MemoryEngine`] handles backed by one store per user.
pub struct MemoryEngineFactory {
    disks: DashMap<UserHandle, Arc<MemoryDisk>>,
    handles: DashMap<UserHandle, Arc<MemoryEngine>>,
    opened: DashMap<UserHandle, usize>,
    fail_next_open: AtomicBool,
    optimize_threshold: AtomicUsize,
}

impl Default for MemoryEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngineFactory {
    pub fn new() -> Self {
        Self {
            disks: DashMap::new(),
            handles: DashMap::new(),
            opened: DashMap::new(),
            fail_next_open: AtomicBool::new(false),
            optimize_threshold: AtomicUsize::new(DEFAULT_OPTIMIZE_THRESHOLD),
        }
    }

    pub fn with_optimize_threshold(self, threshold: usize) -> Self {
        self.optimize_threshold.store(threshold, Ordering::Relaxed);
        self
    }

    /// Makes the next `open` fail once.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    pub fn open_count(&self, user: UserHandle) -> usize {
        self.opened.get(&user).map(|count| *count).unwrap_or(0)
    }

    /// Most recently opened handle of `user`.
    pub fn handle(&self, user: UserHandle) -> Option<Arc<MemoryEngine>> {
        self.handles.get(&user).map(|handle| Arc::clone(handle.value()))
    }
}

impl EngineFactory for MemoryEngineFactory {
    fn open(&self, user: UserHandle) -> Result<Arc<dyn Engine>, EngineError> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Internal(format!("cannot open index for {user}")));
        }
        let disk = Arc::clone(self.disks.entry(user).or_default().value());
        let engine = Arc::new(MemoryEngine::with_disk(
            user,
            disk,
            self.optimize_threshold.load(Ordering::Relaxed),
        ));
        self.handles.insert(user, Arc::clone(&engine));
        *self.opened.entry(user).or_insert(0) += 1;
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PropertyConfig;
    use visibility_checker::VisibilityConfig;

    const PKG: &str = "com.example.mail";
    const DB: &str = "inbox";

    fn engine_with_email_schema() -> MemoryEngine {
        let engine = MemoryEngine::new(UserHandle::of(0));
        engine
            .set_schema(
                PKG,
                DB,
                SetSchemaRequest {
                    schemas: vec![SchemaType::new("Email")
                        .with_property(PropertyConfig::required("subject"))
                        .with_property(PropertyConfig::optional("body"))],
                    ..SetSchemaRequest::default()
                },
            )
            .unwrap();
        engine
    }

    fn email(id: &str, subject: &str) -> Document {
        Document::new("ns", id, "Email").with_property("subject", subject)
    }

    #[test]
    fn put_requires_known_schema_and_required_properties() {
        let engine = engine_with_email_schema();
        assert!(engine.put_document(PKG, DB, email("1", "hello")).is_ok());
        let missing = Document::new("ns", "2", "Email").with_property("body", "x");
        assert!(matches!(
            engine.put_document(PKG, DB, missing),
            Err(EngineError::InvalidArgument(_))
        ));
        let unknown = Document::new("ns", "3", "Note");
        assert!(engine.put_document(PKG, DB, unknown).is_err());
    }

    #[test]
    fn removing_a_type_with_documents_needs_force() {
        let engine = engine_with_email_schema();
        engine.put_document(PKG, DB, email("1", "hello")).unwrap();
        let err = engine
            .set_schema(PKG, DB, SetSchemaRequest::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::SchemaIncompatible(_)));

        let response = engine
            .set_schema(
                PKG,
                DB,
                SetSchemaRequest {
                    force_override: true,
                    ..SetSchemaRequest::default()
                },
            )
            .unwrap();
        assert!(response.deleted_types.contains("Email"));
        assert!(engine.get_document(PKG, DB, "ns", "1").is_err());
        assert!(engine.schema_types_of(PKG).unwrap().is_empty());
    }

    #[test]
    fn visibility_is_compiled_per_prefixed_schema() {
        let engine = MemoryEngine::new(UserHandle::of(0));
        let mut visibility = HashMap::new();
        visibility.insert(
            "Email".to_string(),
            SchemaVisibility::new(VisibilityConfig::default().hidden_from_system()),
        );
        engine
            .set_schema(
                PKG,
                DB,
                SetSchemaRequest {
                    schemas: vec![SchemaType::new("Email"), SchemaType::new("Note")],
                    visibility,
                    ..SetSchemaRequest::default()
                },
            )
            .unwrap();
        let email = engine.visibility(&prefixed_schema(PKG, DB, "Email")).unwrap();
        assert!(!email.displayed_by_system);
        let note = engine.visibility(&prefixed_schema(PKG, DB, "Note")).unwrap();
        assert!(note.displayed_by_system);

        engine.clear_package_data(PKG).unwrap();
        assert!(engine.visibility(&prefixed_schema(PKG, DB, "Email")).is_none());
    }

    #[test]
    fn query_filters_and_limits() {
        let engine = engine_with_email_schema();
        for (id, subject) in [("1", "quarterly report"), ("2", "lunch"), ("3", "report draft")] {
            engine.put_document(PKG, DB, email(id, subject)).unwrap();
        }
        let hits = engine.query(PKG, DB, &SearchSpec::new("report")).unwrap();
        assert_eq!(hits.len(), 2);
        let limited = engine
            .query(PKG, DB, &SearchSpec::new("report").with_limit(1))
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(engine.global_query(&SearchSpec::new("")).unwrap().len(), 3);
        assert_eq!(
            engine
                .remove_by_query(PKG, DB, &SearchSpec::new("lunch"))
                .unwrap(),
            1
        );
        assert_eq!(engine.get_namespaces(PKG, DB).unwrap(), vec!["ns".to_string()]);
    }

    #[test]
    fn change_notifications_are_drained_once() {
        let engine = engine_with_email_schema();
        engine.put_document(PKG, DB, email("1", "a")).unwrap();
        engine.put_document(PKG, DB, email("2", "b")).unwrap();
        let changes = engine.dispatch_and_clear_change_notifications();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].document_ids.len(), 2);
        assert!(engine.dispatch_and_clear_change_notifications().is_empty());
    }

    #[test]
    fn prune_keeps_installed_packages() {
        let engine = engine_with_email_schema();
        engine
            .set_schema(
                "com.gone",
                "db",
                SetSchemaRequest {
                    schemas: vec![SchemaType::new("Thing")],
                    ..SetSchemaRequest::default()
                },
            )
            .unwrap();
        let installed: HashSet<String> = [PKG.to_string()].into_iter().collect();
        assert_eq!(
            engine.prune_package_data(&installed).unwrap(),
            vec!["com.gone".to_string()]
        );
        assert_eq!(engine.schema_types_of(PKG).unwrap().len(), 1);
    }

    #[test]
    fn optimize_runs_after_enough_deletions() {
        let disk = Arc::new(MemoryDisk::default());
        let engine = MemoryEngine::with_disk(UserHandle::of(0), disk, 2);
        engine
            .set_schema(
                PKG,
                DB,
                SetSchemaRequest {
                    schemas: vec![SchemaType::new("Email")],
                    ..SetSchemaRequest::default()
                },
            )
            .unwrap();
        engine.put_document(PKG, DB, Document::new("ns", "1", "Email")).unwrap();
        engine.remove(PKG, DB, "ns", "1").unwrap();
        assert!(!engine.check_for_optimize().unwrap());
        engine.put_document(PKG, DB, Document::new("ns", "2", "Email")).unwrap();
        engine.remove(PKG, DB, "ns", "2").unwrap();
        assert!(engine.check_for_optimize().unwrap());
        assert_eq!(engine.optimize_runs(), 1);
    }

    #[test]
    fn closed_engine_rejects_work_but_factory_reopens_same_data() {
        let factory = MemoryEngineFactory::new();
        let user = UserHandle::of(10);
        let first = factory.open(user).unwrap();
        first
            .set_schema(
                PKG,
                DB,
                SetSchemaRequest {
                    schemas: vec![SchemaType::new("Email")],
                    ..SetSchemaRequest::default()
                },
            )
            .unwrap();
        first.close().unwrap();
        assert_eq!(first.persist_to_disk(PersistMode::Lite), Err(EngineError::Closed));

        let second = factory.open(user).unwrap();
        assert_eq!(second.schema_types_of(PKG).unwrap().len(), 1);
        assert_eq!(factory.open_count(user), 2);

        factory.fail_next_open();
        assert!(factory.open(user).is_err());
        assert!(factory.open(user).is_ok());
    }
}
