use appsearch_core_types::{AppSearchError, UserHandle};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("executor for {user} is saturated ({capacity} tasks queued)")]
    Saturated { user: UserHandle, capacity: usize },
    #[error("executor for {0} is stopped")]
    Stopped(UserHandle),
    #[error("rate limit exceeded for package {package}")]
    RateLimited { package: String },
    #[error("task cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SchedulerError> for AppSearchError {
    fn from(value: SchedulerError) -> Self {
        match value {
            SchedulerError::Saturated { .. } | SchedulerError::RateLimited { .. } => {
                AppSearchError::RateLimited(value.to_string())
            }
            SchedulerError::Stopped(_) => AppSearchError::Locked(value.to_string()),
            SchedulerError::Cancelled | SchedulerError::Internal(_) => {
                AppSearchError::Internal(value.to_string())
            }
        }
    }
}
