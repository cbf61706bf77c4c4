//! Platform-side AppSearch service: admission of calls from apps, per-user
//! serial execution, visibility-filtered global reads and the lifecycle of
//! per-user instances.

pub mod batch;
pub mod callback;
pub mod environment;
pub mod gate;
mod lifecycle;
pub mod metrics;
pub mod platform;
pub mod service;
pub mod telemetry;
pub mod timing;

pub use batch::BatchResult;
pub use callback::ResultCallback;
pub use environment::{ChangeNotificationSink, NoopChangeSink, ServiceEnvironment};
pub use gate::{Admission, AdmittedCall, CallAdmissionGate, CallRequest};
pub use platform::{FakePlatform, Platform, TransportIdentity};
pub use service::{AppSearchService, Operation};
pub use timing::{CallTimer, OperationCounts};
