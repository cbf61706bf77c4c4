use appsearch_core_types::{AppSearchError, UserHandle};
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no instance open for {0}")]
    NotFound(UserHandle),
    #[error("{0} is locked")]
    Locked(UserHandle),
    #[error("cannot open instance for {user}: {source}")]
    Open {
        user: UserHandle,
        #[source]
        source: EngineError,
    },
}

impl From<RegistryError> for AppSearchError {
    fn from(value: RegistryError) -> Self {
        match &value {
            RegistryError::NotFound(_) | RegistryError::Locked(_) => {
                AppSearchError::locked(value.to_string())
            }
            RegistryError::Open { .. } => AppSearchError::internal(value.to_string()),
        }
    }
}
