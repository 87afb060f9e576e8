mod error;

pub use error::*;

/// Name of the kubernetes resource field manager used for server-side apply.
pub const MANAGER_NAME: &str = "mongodb-operator";
