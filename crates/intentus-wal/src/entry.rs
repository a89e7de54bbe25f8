use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use intentus_crypto::hash_value;

/// WAL schema version written into every entry.
pub const WAL_VERSION: &str = "1.0";

/// Entry classification. The dotted names are the stable wire identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalEntryType {
    #[serde(rename = "execution.started")]
    ExecutionStarted,
    #[serde(rename = "execution.completed")]
    ExecutionCompleted,
    #[serde(rename = "execution.failed")]
    ExecutionFailed,
    #[serde(rename = "execution.aborted")]
    ExecutionAborted,
    #[serde(rename = "step.started")]
    StepStarted,
    #[serde(rename = "step.completed")]
    StepCompleted,
    #[serde(rename = "step.failed")]
    StepFailed,
    #[serde(rename = "step.skipped")]
    StepSkipped,
    #[serde(rename = "fallback.triggered")]
    FallbackTriggered,
    #[serde(rename = "fallback.exhausted")]
    FallbackExhausted,
    #[serde(rename = "contract.validated")]
    ContractValidated,
    #[serde(rename = "contract.violated")]
    ContractViolated,
    #[serde(rename = "recovery.started")]
    RecoveryStarted,
    #[serde(rename = "recovery.completed")]
    RecoveryCompleted,
    #[serde(rename = "checkpoint")]
    Checkpoint,
}

impl WalEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalEntryType::ExecutionStarted => "execution.started",
            WalEntryType::ExecutionCompleted => "execution.completed",
            WalEntryType::ExecutionFailed => "execution.failed",
            WalEntryType::ExecutionAborted => "execution.aborted",
            WalEntryType::StepStarted => "step.started",
            WalEntryType::StepCompleted => "step.completed",
            WalEntryType::StepFailed => "step.failed",
            WalEntryType::StepSkipped => "step.skipped",
            WalEntryType::FallbackTriggered => "fallback.triggered",
            WalEntryType::FallbackExhausted => "fallback.exhausted",
            WalEntryType::ContractValidated => "contract.validated",
            WalEntryType::ContractViolated => "contract.violated",
            WalEntryType::RecoveryStarted => "recovery.started",
            WalEntryType::RecoveryCompleted => "recovery.completed",
            WalEntryType::Checkpoint => "checkpoint",
        }
    }

    /// Terminal entries end an execution; a WAL without one is incomplete.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WalEntryType::ExecutionCompleted
                | WalEntryType::ExecutionFailed
                | WalEntryType::ExecutionAborted
        )
    }

    /// Entries that resolve an in-flight step.
    pub fn resolves_step(&self) -> bool {
        matches!(
            self,
            WalEntryType::StepCompleted | WalEntryType::StepFailed | WalEntryType::StepSkipped
        )
    }
}

impl std::fmt::Display for WalEntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single append-only journal entry.
///
/// `entry_hash` covers the canonical encoding of the entry minus itself
/// and minus the signature fields, so the chain stays verifiable whether
/// or not signing is enabled.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalEntry {
    /// Strictly monotonic within one execution, starting at 1.
    pub seq: u64,
    pub execution_id: String,
    pub timestamp_iso: String,
    pub entry_type: WalEntryType,
    pub payload: Value,
    /// Hash of the previous entry; `None` only at seq 1.
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_key_id: Option<String>,
}

impl WalEntry {
    /// Recompute the content hash over the hash-covered field subset.
    pub fn compute_hash(&self) -> String {
        let tree = json!({
            "seq": self.seq,
            "executionId": self.execution_id,
            "timestampIso": self.timestamp_iso,
            "entryType": self.entry_type.as_str(),
            "payload": self.payload,
            "prevHash": self.prev_hash,
            "version": self.version,
        });
        hash_value(&tree)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some() && self.signer_key_id.is_some()
    }

    /// Step id carried in the payload of step-scoped entries.
    pub fn step_id(&self) -> Option<&str> {
        self.payload.get("stepId").and_then(Value::as_str)
    }

    pub fn agent_name(&self) -> Option<&str> {
        self.payload.get("agentName").and_then(Value::as_str)
    }
}
