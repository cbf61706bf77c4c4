pub mod engine;
pub mod errors;
pub mod lock;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod state;

pub use engine::{
    ChangeNotification, Document, Engine, EngineError, EngineFactory, GetSchemaResponse,
    PersistMode, PropertyConfig, SchemaType, SearchHit, SearchSpec, SetSchemaRequest,
    SetSchemaResponse, StorageInfo,
};
pub use errors::RegistryError;
pub use lock::{LockSnapshot, UnlockStateSource, UserLockTracker};
pub use memory::{MemoryEngine, MemoryEngineFactory};
pub use model::PerUserInstance;
pub use state::{InstanceOptions, UserInstanceRegistry};
