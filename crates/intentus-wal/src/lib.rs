//! Write-ahead log: append-only, hash-chained, fsync-durable journal.
//!
//! The WAL is the source of truth for execution state. Every state
//! transition is appended and fsynced *before* the corresponding side
//! effect occurs, so after a crash the log contains either no trace of a
//! step or a `step.started` entry with no completion, never a silent
//! half-state. Entries are chained by SHA-256 content hash and may carry
//! Ed25519 signatures in regulated deployments.
//!
//! One JSONL file per execution: `<walDir>/<executionId>.wal`.

#![deny(unsafe_code)]

pub mod entry;
pub mod error;
pub mod reader;
pub mod writer;

pub use entry::{WalEntry, WalEntryType, WAL_VERSION};
pub use error::{IntegrityKind, WalError};
pub use reader::WalReader;
pub use writer::WalWriter;
