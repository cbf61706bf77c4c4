mod call;
mod error;
mod identity;

pub use call::{CallId, CallType, UnknownCallType};
pub use error::{AppSearchError, AppSearchResult, ResultCode};
pub use identity::{CallerIdentity, PackageIdentifier, Uid, UserHandle};

/// Package name under which the visibility bookkeeping schemas are stored.
///
/// Nothing stored under this package is ever visible to a caller.
pub const VISIBILITY_STORE_PACKAGE: &str = "VS#Pkg";

/// Database name used by the visibility bookkeeping schemas.
pub const VISIBILITY_STORE_DATABASE: &str = "VS#Db";

/// Builds the engine-wide name of a schema type owned by `package`/`database`.
pub fn prefixed_schema(package: &str, database: &str, schema_type: &str) -> String {
    format!("{package}${database}/{schema_type}")
}

/// Splits a prefixed schema back into `(package, database, schema_type)`.
pub fn split_prefixed_schema(prefixed: &str) -> Option<(&str, &str, &str)> {
    let (prefix, schema_type) = prefixed.split_once('/')?;
    let (package, database) = prefix.split_once('$')?;
    Some((package, database, schema_type))
}
