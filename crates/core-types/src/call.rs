use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// Identifier attached to every inbound call for log correlation.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CallId(pub String);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of operation requested by a caller.
///
/// The wire names are the ones used in denylist and rate-limit configuration.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum CallType {
    Initialize,
    SetSchema,
    GetSchema,
    GetNamespaces,
    PutDocuments,
    GetDocuments,
    Search,
    RemoveByDocumentId,
    RemoveBySearch,
    GlobalSearch,
    GlobalGetDocuments,
    GlobalGetSchema,
    Flush,
    GetStorageInfo,
}

impl CallType {
    pub const ALL: [CallType; 14] = [
        CallType::Initialize,
        CallType::SetSchema,
        CallType::GetSchema,
        CallType::GetNamespaces,
        CallType::PutDocuments,
        CallType::GetDocuments,
        CallType::Search,
        CallType::RemoveByDocumentId,
        CallType::RemoveBySearch,
        CallType::GlobalSearch,
        CallType::GlobalGetDocuments,
        CallType::GlobalGetSchema,
        CallType::Flush,
        CallType::GetStorageInfo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CallType::Initialize => "initialize",
            CallType::SetSchema => "localSetSchema",
            CallType::GetSchema => "localGetSchema",
            CallType::GetNamespaces => "localGetNamespaces",
            CallType::PutDocuments => "localPutDocuments",
            CallType::GetDocuments => "localGetDocuments",
            CallType::Search => "localSearch",
            CallType::RemoveByDocumentId => "localRemoveByDocumentId",
            CallType::RemoveBySearch => "localRemoveBySearch",
            CallType::GlobalSearch => "globalSearch",
            CallType::GlobalGetDocuments => "globalGetDocuments",
            CallType::GlobalGetSchema => "globalGetSchema",
            CallType::Flush => "flush",
            CallType::GetStorageInfo => "localGetStorageInfo",
        }
    }

    /// Calls that change stored data and therefore produce change notifications.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            CallType::SetSchema
                | CallType::PutDocuments
                | CallType::RemoveByDocumentId
                | CallType::RemoveBySearch
        )
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown call type: {0}")]
pub struct UnknownCallType(pub String);

impl FromStr for CallType {
    type Err = UnknownCallType;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        CallType::ALL
            .into_iter()
            .find(|call| call.as_str() == trimmed)
            .ok_or_else(|| UnknownCallType(trimmed.to_string()))
    }
}
