//! Persistent state for the execution runtime.
//!
//! Everything under one base directory:
//! - `wal/<executionId>.wal`: the journals (written by `intentus-wal`)
//! - `records/<executionId>.json`: immutable execution records
//! - `locks/<executionId>.lock`: advisory per-execution locks
//! - `idempotency/idempotency_index.json`: dedup index
//!
//! Retrieval and recovery read only from WAL + records; no agent code is
//! ever executed from here.

#![deny(unsafe_code)]

pub mod error;
pub mod fsutil;
pub mod idempotency;
pub mod layout;
pub mod lock;
pub mod record;
pub mod recovery;
pub mod retrieval;

pub use error::StoreError;
pub use idempotency::{derive_key, IdempotencyIndex};
pub use layout::StoreLayout;
pub use lock::{ExecutionLock, LockManager};
pub use record::{ExecutionRecord, RecordBuilder, RecordEvent, RecordStore};
pub use recovery::{RecoveryAnalysis, RecoveryDecision, RecoveryManager};
pub use retrieval::{RetrievalEngine, RetrievalResult, RETRIEVAL_WARNING};
