use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Replay-safety classification of an agent invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectClass {
    /// No state changes; safe to retry and replay.
    #[default]
    ReadOnly,
    /// Changes state but declares a compensation path.
    Reversible,
    /// Changes state with no safe undo. Never retried, never resumed.
    Irreversible,
}

impl SideEffectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffectClass::ReadOnly => "read_only",
            SideEffectClass::Reversible => "reversible",
            SideEffectClass::Irreversible => "irreversible",
        }
    }

    /// Escalation rank. READ_ONLY < REVERSIBLE < IRREVERSIBLE; a fallback
    /// chain may escalate but never de-escalate from irreversible.
    pub fn rank(&self) -> u8 {
        match self {
            SideEffectClass::ReadOnly => 0,
            SideEffectClass::Reversible => 1,
            SideEffectClass::Irreversible => 2,
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_cost_units() -> f64 {
    1_000.0
}

/// Declared execution guarantees for one routed intent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContract {
    #[serde(default)]
    pub exactly_once: bool,
    #[serde(default)]
    pub no_retry: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub idempotent_required: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_cost_units")]
    pub max_cost_units: f64,
}

impl Default for ExecutionContract {
    fn default() -> Self {
        Self {
            exactly_once: false,
            no_retry: false,
            max_retries: 0,
            idempotent_required: false,
            timeout_ms: default_timeout_ms(),
            max_cost_units: default_max_cost_units(),
        }
    }
}

impl ExecutionContract {
    /// Validate the contract against the side-effect class of the step it
    /// governs. Must pass before any WAL entry is written.
    pub fn validate(&self, side_effect: SideEffectClass) -> Result<(), ContractViolation> {
        if self.timeout_ms == 0 {
            return Err(ContractViolation::NonPositiveTimeout);
        }
        if self.max_cost_units <= 0.0 {
            return Err(ContractViolation::NonPositiveBudget(self.max_cost_units));
        }
        if self.no_retry && self.max_retries > 0 {
            return Err(ContractViolation::NoRetryConflict {
                retries: self.max_retries,
            });
        }
        if self.max_retries > 0 && side_effect == SideEffectClass::Irreversible {
            return Err(ContractViolation::RetriesOnIrreversible {
                retries: self.max_retries,
            });
        }
        Ok(())
    }
}

/// A breached contract precondition or invariant.
#[derive(Debug, Error)]
pub enum ContractViolation {
    #[error("maxRetries={retries} is forbidden for an irreversible step")]
    RetriesOnIrreversible { retries: u32 },

    #[error("noRetry conflicts with maxRetries={retries}")]
    NoRetryConflict { retries: u32 },

    #[error("timeoutMs must be positive")]
    NonPositiveTimeout,

    #[error("maxCostUnits must be positive, got {0}")]
    NonPositiveBudget(f64),

    #[error("step {step_id} was already completed under an exactly-once contract")]
    DuplicateStep { step_id: String },

    #[error("fallback past an irreversible step is forbidden (step {step_id})")]
    IrreversibleFallback { step_id: String },
}

impl ContractViolation {
    /// Machine-readable reason recorded in `contract.violated` WAL entries.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ContractViolation::RetriesOnIrreversible { .. } => "irreversible_retries",
            ContractViolation::NoRetryConflict { .. } => "no_retry_conflict",
            ContractViolation::NonPositiveTimeout => "timeout_ms",
            ContractViolation::NonPositiveBudget(_) => "max_cost_units",
            ContractViolation::DuplicateStep { .. } => "exactly_once",
            ContractViolation::IrreversibleFallback { .. } => "irreversible_fallback",
        }
    }
}
