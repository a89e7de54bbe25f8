//! The deterministic intent router and its supporting machinery.
//!
//! The router coordinates, never acts: agents do the work, the router
//! selects them, orders them deterministically, enforces contracts, and
//! journals every transition to the WAL before the corresponding side
//! effect happens. Given the same envelope and the same registry state,
//! two invocations produce the same decision path, the same WAL trace
//! (modulo timestamps and ids), and the same response hash.

#![deny(unsafe_code)]

pub mod agent;
pub mod contract;
pub mod error;
pub mod fingerprint;
pub mod invoke;
pub mod middleware;
pub mod recovery;
pub mod registry;
pub mod router;
mod strategy;

pub use agent::{Agent, AgentError};
pub use contract::ContractEngine;
pub use error::RouterError;
pub use fingerprint::ExecutionFingerprint;
pub use middleware::RouterHook;
pub use recovery::{RecoveryCoordinator, RecoveryOutcome};
pub use registry::{AgentRegistry, RegistryError};
pub use router::{IntentRouter, RouteOutcome, RouterConfig};
