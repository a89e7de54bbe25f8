use thiserror::Error;

use intentus_protocol::ComplianceError;
use intentus_store::StoreError;
use intentus_wal::WalError;

use crate::registry::RegistryError;

/// Internal router failures. These never reach `route()` callers (the
/// router converts them into error responses), but construction and
/// recovery surfaces report them directly.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Compliance(#[from] ComplianceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("router serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RouterError {
    fn from(e: serde_json::Error) -> Self {
        RouterError::Serialization(e.to_string())
    }
}
