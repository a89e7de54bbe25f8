use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Integrity failure subtypes, stable across the CLI and error payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityKind {
    SeqGap,
    HashChainBroken,
    EntryHashInvalid,
    SignatureInvalid,
}

impl IntegrityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityKind::SeqGap => "seq_gap",
            IntegrityKind::HashChainBroken => "hash_chain_broken",
            IntegrityKind::EntryHashInvalid => "entry_hash_invalid",
            IntegrityKind::SignatureInvalid => "signature_invalid",
        }
    }
}

impl std::fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL already exists for execution {0}")]
    AlreadyExists(String),

    #[error("WAL not found for execution {0}")]
    NotFound(String),

    #[error("WAL serialization error: {0}")]
    Serialization(String),

    #[error("WAL integrity error at seq {seq}: {kind}")]
    Integrity { kind: IntegrityKind, seq: u64 },

    #[error("WAL signing required but no signer configured")]
    SigningRequired,
}

impl From<serde_json::Error> for WalError {
    fn from(e: serde_json::Error) -> Self {
        WalError::Serialization(e.to_string())
    }
}

impl WalError {
    pub fn integrity_kind(&self) -> Option<IntegrityKind> {
        match self {
            WalError::Integrity { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
