//! Narrow interface onto the document index.
//!
//! The index itself lives outside this workspace; the service only needs the
//! operations below. Every operation is keyed by the owning package and
//! database, which the engine combines into prefixed schema names
//! (`package$database/Type`).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use appsearch_core_types::{AppSearchError, UserHandle};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use visibility_checker::{SchemaVisibility, VisibilityConfigStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("incompatible schema change: {0}")]
    SchemaIncompatible(String),
    #[error("engine is closed")]
    Closed,
    #[error("engine failure: {0}")]
    Internal(String),
}

impl From<EngineError> for AppSearchError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::NotFound(_) => AppSearchError::NotFound(value.to_string()),
            EngineError::InvalidArgument(_) | EngineError::SchemaIncompatible(_) => {
                AppSearchError::InvalidArgument(value.to_string())
            }
            EngineError::Closed | EngineError::Internal(_) => {
                AppSearchError::Internal(value.to_string())
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

impl PropertyConfig {
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }

    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaType {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

impl SchemaType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: PropertyConfig) -> Self {
        self.properties.push(property);
        self
    }

    pub fn required_properties(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|property| property.required)
            .map(|property| property.name.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SetSchemaRequest {
    pub schemas: Vec<SchemaType>,
    /// Visibility keyed by unprefixed schema type. Types without an entry get
    /// the default settings.
    #[serde(default)]
    pub visibility: HashMap<String, SchemaVisibility>,
    #[serde(default)]
    pub force_override: bool,
    #[serde(default)]
    pub version: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetSchemaResponse {
    pub deleted_types: BTreeSet<String>,
    pub incompatible_types: BTreeSet<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetSchemaResponse {
    pub version: u32,
    pub schemas: Vec<SchemaType>,
    pub visibility: HashMap<String, SchemaVisibility>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub namespace: String,
    pub id: String,
    pub schema_type: String,
    #[serde(default)]
    pub creation_timestamp_ms: u64,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Document {
    pub fn new(
        namespace: impl Into<String>,
        id: impl Into<String>,
        schema_type: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
            schema_type: schema_type.into(),
            creation_timestamp_ms: 0,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Rough size used for storage accounting.
    pub fn approximate_size(&self) -> u64 {
        let properties = serde_json::to_string(&self.properties)
            .map(|raw| raw.len())
            .unwrap_or(0);
        (self.namespace.len() + self.id.len() + self.schema_type.len() + properties) as u64
    }

    pub(crate) fn matches_terms(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        query
            .split_whitespace()
            .all(|term| self.properties.values().any(|value| value_contains(value, term)))
    }
}

fn value_contains(value: &Value, term: &str) -> bool {
    match value {
        Value::String(text) => text.to_lowercase().contains(term),
        Value::Array(items) => items.iter().any(|item| value_contains(item, term)),
        Value::Object(map) => map.values().any(|item| value_contains(item, term)),
        Value::Number(number) => number.to_string() == term,
        _ => false,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpec {
    /// Whitespace separated terms; every term must occur in some property.
    pub query: String,
    #[serde(default)]
    pub schema_filters: Vec<String>,
    #[serde(default)]
    pub namespace_filters: Vec<String>,
    /// Zero means unlimited.
    #[serde(default)]
    pub limit: usize,
}

impl SearchSpec {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_schema_filter(mut self, schema_type: impl Into<String>) -> Self {
        self.schema_filters.push(schema_type.into());
        self
    }

    pub fn with_namespace_filter(mut self, namespace: impl Into<String>) -> Self {
        self.namespace_filters.push(namespace.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub(crate) fn accepts(&self, document: &Document) -> bool {
        (self.schema_filters.is_empty() || self.schema_filters.contains(&document.schema_type))
            && (self.namespace_filters.is_empty()
                || self.namespace_filters.contains(&document.namespace))
            && document.matches_terms(&self.query)
    }
}

/// One result of a query, with the owner of the document.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub package_name: String,
    pub database: String,
    pub document: Document,
}

impl SearchHit {
    pub fn prefixed_schema(&self) -> String {
        appsearch_core_types::prefixed_schema(
            &self.package_name,
            &self.database,
            &self.document.schema_type,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PersistMode {
    /// Flushes enough to survive a process crash.
    Lite,
    /// Full flush, also surviving a power loss.
    Full,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub size_bytes: u64,
    pub alive_documents: u64,
    pub alive_namespaces: u64,
}

impl StorageInfo {
    pub fn merge(&mut self, other: StorageInfo) {
        self.size_bytes += other.size_bytes;
        self.alive_documents += other.alive_documents;
        self.alive_namespaces += other.alive_namespaces;
    }
}

/// Documents changed by mutations since the last dispatch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeNotification {
    pub package_name: String,
    pub database: String,
    pub namespace: String,
    pub schema_type: String,
    pub document_ids: BTreeSet<String>,
}

/// The index operations used by the service.
///
/// Calls for one user are serialized by that user's executor; only read-only
/// statistics are taken from other threads.
pub trait Engine: VisibilityConfigStore + Send + Sync {
    fn set_schema(
        &self,
        package: &str,
        database: &str,
        request: SetSchemaRequest,
    ) -> Result<SetSchemaResponse, EngineError>;

    fn get_schema(&self, package: &str, database: &str) -> Result<GetSchemaResponse, EngineError>;

    /// Every prefixed schema type stored for `package`, across databases.
    fn schema_types_of(&self, package: &str) -> Result<Vec<String>, EngineError>;

    fn get_namespaces(&self, package: &str, database: &str) -> Result<Vec<String>, EngineError>;

    fn put_document(
        &self,
        package: &str,
        database: &str,
        document: Document,
    ) -> Result<(), EngineError>;

    fn get_document(
        &self,
        package: &str,
        database: &str,
        namespace: &str,
        id: &str,
    ) -> Result<Document, EngineError>;

    fn query(
        &self,
        package: &str,
        database: &str,
        spec: &SearchSpec,
    ) -> Result<Vec<SearchHit>, EngineError>;

    /// Matches across every package. Visibility is applied by the caller, so
    /// the limit of `spec` is not applied here.
    fn global_query(&self, spec: &SearchSpec) -> Result<Vec<SearchHit>, EngineError>;

    fn remove(
        &self,
        package: &str,
        database: &str,
        namespace: &str,
        id: &str,
    ) -> Result<(), EngineError>;

    fn remove_by_query(
        &self,
        package: &str,
        database: &str,
        spec: &SearchSpec,
    ) -> Result<usize, EngineError>;

    fn persist_to_disk(&self, mode: PersistMode) -> Result<(), EngineError>;

    /// Compacts when enough garbage accumulated. Returns whether it did.
    fn check_for_optimize(&self) -> Result<bool, EngineError>;

    fn storage_info(
        &self,
        package: &str,
        database: Option<&str>,
    ) -> Result<StorageInfo, EngineError>;

    fn dispatch_and_clear_change_notifications(&self) -> Vec<ChangeNotification>;

    fn clear_package_data(&self, package: &str) -> Result<(), EngineError>;

    /// Drops data of every package not in `installed`; returns the pruned packages.
    fn prune_package_data(&self, installed: &HashSet<String>) -> Result<Vec<String>, EngineError>;

    fn close(&self) -> Result<(), EngineError>;
}

/// Opens the engine handle of one user.
pub trait EngineFactory: Send + Sync {
    fn open(&self, user: UserHandle) -> Result<Arc<dyn Engine>, EngineError>;
}
