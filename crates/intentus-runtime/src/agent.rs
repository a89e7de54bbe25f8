use async_trait::async_trait;
use thiserror::Error;

use intentus_protocol::{AgentDefinition, AgentResponse, IntentEnvelope, SideEffectClass};

/// Failure raised by an agent implementation. The router normalizes these
/// to `INTERNAL_AGENT_ERROR`; agents that want a structured error should
/// return an error `AgentResponse` instead.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AgentError {
    pub message: String,
    pub retryable: bool,
}

impl AgentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// A named handler for one or more capabilities.
///
/// Implementations declare their side-effect class and cost up front so
/// the contract engine can validate before anything is journaled or
/// executed.
#[async_trait]
pub trait Agent: Send + Sync {
    fn definition(&self) -> &AgentDefinition;

    /// Handle one envelope. Runs under the router's deadline watchdog.
    async fn handle(&self, envelope: &IntentEnvelope) -> Result<AgentResponse, AgentError>;

    fn name(&self) -> &str {
        &self.definition().name
    }

    /// Replay-safety class of this agent's work.
    fn side_effect(&self) -> SideEffectClass {
        SideEffectClass::ReadOnly
    }

    /// Pre-execution cost estimate in abstract cost units.
    fn estimate_cost(&self, _envelope: &IntentEnvelope) -> f64 {
        1.0
    }

    /// Whether `compensate` is implemented. Reversible agents without a
    /// compensation hook block recovery instead of resuming.
    fn supports_compensation(&self) -> bool {
        false
    }

    /// Undo the effects of an in-flight step during recovery.
    async fn compensate(&self, _step_id: &str) -> Result<(), AgentError> {
        Err(AgentError::new("agent declares no compensation hook"))
    }
}
