use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::PROTOCOL_VERSION;

/// Stable, language-neutral failure taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No registered agent matches the intent name + version.
    CapabilityNotFound,
    /// Invalid routing options or missing target agent.
    RoutingError,
    /// Agent panicked or returned a transport-level failure; normalized.
    InternalAgentError,
    /// Agent returned a structured error of its own.
    AgentError,
    /// Contract precondition or invariant breached.
    ContractViolation,
    /// Step exceeded its declared timeout.
    Timeout,
    /// Pre-execution estimate above the declared budget.
    BudgetExceeded,
    /// Hash chain, sequence, or signature failure in a WAL.
    WalIntegrityError,
    /// Terminal failure of an irreversible step.
    IrreversibleStepFailed,
    /// PARALLEL under a determinism-requiring mode, or fingerprint drift.
    DeterminismViolation,
    /// Registry name collision.
    DuplicateAgent,
    /// Surfaced from an external transport boundary.
    TransportError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(s.trim_matches('"'))
    }
}

/// Suggested handling attached to a structured failure. The router
/// consults this when deciding whether to advance the fallback chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    Retry,
    RetryAfterDelay,
    Fallback,
    Abort,
    ManualIntervention,
}

/// Structured error carried inside an error response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryStrategy>,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
            details: Map::new(),
            recovery: None,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// Attach a machine-readable failure subtype (e.g. `target_not_registered`).
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.details
            .insert("subtype".into(), Value::String(subtype.into()));
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryStrategy) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn subtype(&self) -> Option<&str> {
        self.details.get("subtype").and_then(Value::as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// The router's answer to a routed envelope. Routing never raises to the
/// caller; failures are carried here as `status = error`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub version: String,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl AgentResponse {
    pub fn success(payload: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            status: ResponseStatus::Success,
            payload: Some(payload),
            metadata: Map::new(),
            error: None,
        }
    }

    pub fn failure(error: ErrorInfo) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            status: ResponseStatus::Error,
            payload: None,
            metadata: Map::new(),
            error: Some(error),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_to_stable_identifiers() {
        let json = serde_json::to_string(&ErrorCode::CapabilityNotFound).unwrap();
        assert_eq!(json, "\"CAPABILITY_NOT_FOUND\"");
        assert_eq!(ErrorCode::WalIntegrityError.to_string(), "WAL_INTEGRITY_ERROR");
    }

    #[test]
    fn failure_response_carries_subtype() {
        let resp = AgentResponse::failure(
            ErrorInfo::new(ErrorCode::RoutingError, "target agent 'Z' is not registered")
                .with_subtype("target_not_registered"),
        );
        assert!(!resp.is_success());
        assert_eq!(resp.error_code(), Some(ErrorCode::RoutingError));
        assert_eq!(
            resp.error.as_ref().unwrap().subtype(),
            Some("target_not_registered")
        );
    }

    #[test]
    fn success_response_roundtrip() {
        let resp = AgentResponse::success(serde_json::json!({"sum": 42}))
            .with_metadata("agent", "B");
        let json = serde_json::to_string(&resp).unwrap();
        let restored: AgentResponse = serde_json::from_str(&json).unwrap();
        assert!(restored.is_success());
        assert_eq!(restored.payload.unwrap()["sum"], 42);
        assert_eq!(restored.metadata["agent"], "B");
    }
}
