//! Visibility configuration documents and their loaders.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use appsearch_core_types::PackageIdentifier;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Permissions a schema can require from its readers.
///
/// `EnterpriseAccess` and `ManagedProfileContactsAccess` are markers rather
/// than platform permissions: a set containing either is only considered for
/// enterprise callers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadSms,
    ReadCalendar,
    ReadContacts,
    ReadExternalStorage,
    ReadHomeAppSearchData,
    ReadAssistantAppSearchData,
    EnterpriseAccess,
    ManagedProfileContactsAccess,
    ExecuteAppFunctions,
    ExecuteAppFunctionsTrusted,
    PackageUsageStats,
}

impl Permission {
    pub fn code(self) -> i32 {
        match self {
            Permission::ReadSms => 1,
            Permission::ReadCalendar => 2,
            Permission::ReadContacts => 3,
            Permission::ReadExternalStorage => 4,
            Permission::ReadHomeAppSearchData => 5,
            Permission::ReadAssistantAppSearchData => 6,
            Permission::EnterpriseAccess => 7,
            Permission::ManagedProfileContactsAccess => 8,
            Permission::ExecuteAppFunctions => 9,
            Permission::ExecuteAppFunctionsTrusted => 10,
            Permission::PackageUsageStats => 11,
        }
    }

    pub fn is_enterprise_marker(self) -> bool {
        matches!(
            self,
            Permission::EnterpriseAccess | Permission::ManagedProfileContactsAccess
        )
    }
}

pub type PermissionSet = BTreeSet<Permission>;

/// Whether a permission set is reserved for enterprise callers.
pub fn is_enterprise_set(set: &PermissionSet) -> bool {
    set.iter().any(|permission| permission.is_enterprise_marker())
}

/// One group of visibility clauses.
///
/// As a schema's primary config the clauses are OR-ed; as an entry of
/// `visible_to_configs` every non-empty clause must hold.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    pub not_displayed_by_system: bool,
    pub allowed_packages: BTreeSet<PackageIdentifier>,
    pub required_permission_sets: Vec<PermissionSet>,
    pub publicly_visible_target: Option<PackageIdentifier>,
}

impl VisibilityConfig {
    pub fn allow_package(mut self, package: PackageIdentifier) -> Self {
        self.allowed_packages.insert(package);
        self
    }

    pub fn require_permissions(
        mut self,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        self.required_permission_sets
            .push(permissions.into_iter().collect());
        self
    }

    pub fn publicly_visible_from(mut self, target: PackageIdentifier) -> Self {
        self.publicly_visible_target = Some(target);
        self
    }

    pub fn hidden_from_system(mut self) -> Self {
        self.not_displayed_by_system = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.allowed_packages.is_empty()
            && self.required_permission_sets.is_empty()
            && self.publicly_visible_target.is_none()
    }
}

/// Full visibility settings stored for one schema type.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaVisibility {
    pub config: VisibilityConfig,
    pub visible_to_configs: Vec<VisibilityConfig>,
}

impl SchemaVisibility {
    pub fn new(config: VisibilityConfig) -> Self {
        Self {
            config,
            visible_to_configs: Vec::new(),
        }
    }

    pub fn with_visible_to(mut self, config: VisibilityConfig) -> Self {
        self.visible_to_configs.push(config);
        self
    }
}

/// Visibility settings keyed by unprefixed schema type name.
pub type VisibilityDocument = HashMap<String, SchemaVisibility>;

/// Errors surfaced while decoding visibility documents.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize visibility document: {0}")]
    Deserialize(String),
}

pub fn load_visibility_from_reader<R: Read>(
    mut reader: R,
) -> Result<VisibilityDocument, ConfigError> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    parse_visibility_str(&buf)
}

pub fn load_visibility_from_path(
    path: impl AsRef<Path>,
) -> Result<VisibilityDocument, ConfigError> {
    let file = File::open(path.as_ref())?;
    load_visibility_from_reader(file)
}

pub fn parse_visibility_str(raw: &str) -> Result<VisibilityDocument, ConfigError> {
    match serde_json::from_str(raw) {
        Ok(document) => Ok(document),
        Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
            ConfigError::Deserialize(format!(
                "json error: {}; yaml error: {}",
                json_err, yaml_err
            ))
        }),
    }
}
