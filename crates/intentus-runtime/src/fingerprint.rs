use std::collections::BTreeMap;

use serde::Serialize;

use intentus_crypto::hash_of;

/// Deterministic dimensions of one execution, hashed for drift detection.
///
/// Wall-clock timestamps, execution ids, and log text are excluded: the
/// same envelope against the same registry must fingerprint identically
/// on every run.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFingerprint {
    /// Content hash of the intent reference, one per step.
    pub intent_sequence: Vec<String>,
    /// Agent names in execution order.
    pub tool_sequence: Vec<String>,
    /// Input hash per step.
    pub param_hashes: Vec<String>,
    /// Output hash per step; `None` for failed attempts.
    pub output_hashes: Vec<Option<String>>,
    /// Retry count per step id.
    pub retry_pattern: BTreeMap<String, u32>,
    /// The routing decision path.
    pub execution_order: Vec<String>,
    /// Declared timeout per step.
    pub timeout_values: Vec<u64>,
}

impl ExecutionFingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_step(
        &mut self,
        step_id: &str,
        intent_hash: &str,
        agent_name: &str,
        input_hash: &str,
        output_hash: Option<String>,
        retry_count: u32,
        timeout_ms: u64,
    ) {
        self.intent_sequence.push(intent_hash.to_string());
        self.tool_sequence.push(agent_name.to_string());
        self.param_hashes.push(input_hash.to_string());
        self.output_hashes.push(output_hash);
        self.retry_pattern.insert(step_id.to_string(), retry_count);
        self.timeout_values.push(timeout_ms);
    }

    pub fn set_execution_order(&mut self, decision_path: &[String]) {
        self.execution_order = decision_path.to_vec();
    }

    /// SHA-256 over the canonical encoding of the tuple.
    pub fn compute(&self) -> String {
        hash_of(self).expect("fingerprint tuple always serializes")
    }
}
