pub mod error;
pub mod executor;
pub mod maintenance;
pub mod metrics;
pub mod model;
pub mod rate_limit;
pub mod runtime;
pub mod shared;

pub use error::SchedulerError;
pub use executor::UserExecutor;
pub use maintenance::{MaintenanceKind, MaintenanceRun, MaintenanceScheduler};
pub use model::{DispatchTimeline, Task, TaskContext};
pub use rate_limit::{RateLimiter, RateLimits, RatePermit};
pub use runtime::ExecutorPool;
pub use shared::SharedExecutor;
