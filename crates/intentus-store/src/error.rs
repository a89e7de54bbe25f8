use thiserror::Error;

use intentus_wal::WalError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error("store serialization error: {0}")]
    Serialization(String),

    #[error("no record found for execution {0}")]
    RecordNotFound(String),

    #[error("execution {execution_id} is not retrievable: {reason}")]
    NotRetrievable {
        execution_id: String,
        reason: String,
    },

    #[error("consistency violation for execution {execution_id}: {reason}")]
    ConsistencyViolation {
        execution_id: String,
        reason: String,
    },

    #[error("execution {execution_id} is locked by pid {holder_pid}")]
    Locked {
        execution_id: String,
        holder_pid: u32,
    },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl StoreError {
    /// Stable failure kind surfaced through CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Io(_) => "io_error",
            StoreError::Wal(_) => "wal_integrity_error",
            StoreError::Serialization(_) => "serialization_error",
            StoreError::RecordNotFound(_) => "record_not_found",
            StoreError::NotRetrievable { .. } => "not_retrievable",
            StoreError::ConsistencyViolation { .. } => "consistency_violation",
            StoreError::Locked { .. } => "locked",
        }
    }
}
