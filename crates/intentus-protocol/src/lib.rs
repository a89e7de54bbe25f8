//! IntentusNet protocol data model.
//!
//! Wire-level types shared by every other crate in the workspace:
//! - Intent references and envelopes
//! - Agent definitions and capabilities
//! - Responses and the stable error taxonomy
//! - Execution contracts and side-effect classes
//! - Compliance modes

#![deny(unsafe_code)]

pub mod agent;
pub mod compliance;
pub mod contract;
pub mod intent;
pub mod response;

pub use agent::{AgentDefinition, Capability};
pub use compliance::{ComplianceConfig, ComplianceError, ComplianceMode};
pub use contract::{ContractViolation, ExecutionContract, SideEffectClass};
pub use intent::{
    IntentContext, IntentEnvelope, IntentMetadata, IntentRef, Priority, RoutingMetadata,
    RoutingOptions, RoutingStrategy,
};
pub use response::{AgentResponse, ErrorCode, ErrorInfo, RecoveryStrategy, ResponseStatus};

/// Protocol schema version carried by envelopes and responses.
pub const PROTOCOL_VERSION: &str = "1.0";
