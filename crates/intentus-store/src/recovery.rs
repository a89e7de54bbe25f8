use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use intentus_crypto::KeyRegistry;
use intentus_protocol::SideEffectClass;
use intentus_wal::{WalEntry, WalReader, WalWriter};

use crate::error::StoreError;
use crate::layout::StoreLayout;

/// Recovery decision for one incomplete execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryDecision {
    /// Safe to resume from the identified step.
    Resume,
    /// Operator action required; the runtime will not touch it.
    Block,
}

/// Result of analyzing one WAL for recovery.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAnalysis {
    pub execution_id: String,
    pub decision: RecoveryDecision,
    /// Machine-readable reason: `reversible_in_flight`,
    /// `irreversible_in_flight`, `wal_corrupted`, `no_pending_step`,
    /// `unclassified_side_effect`.
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_side_effect: Option<String>,
    /// Step id to resume from when the decision is RESUME.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from_step: Option<String>,
    pub completed_steps: Vec<String>,
}

/// Scans WALs for incomplete executions and decides RESUME vs BLOCK by
/// side-effect class. Never re-executes an irreversible step whose
/// completion is not recorded.
pub struct RecoveryManager {
    layout: StoreLayout,
}

impl RecoveryManager {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Enumerate executions whose WAL lacks a terminal entry.
    pub fn scan(&self, keys: Option<&KeyRegistry>) -> Result<Vec<RecoveryAnalysis>, StoreError> {
        let mut incomplete = Vec::new();
        for execution_id in self.layout.list_executions()? {
            if let Some(analysis) = self.analyze(&execution_id, keys)? {
                incomplete.push(analysis);
            }
        }
        info!(incomplete = incomplete.len(), "recovery scan finished");
        Ok(incomplete)
    }

    /// Analyze one execution. Returns `None` when the WAL has a terminal
    /// entry (not actually incomplete).
    pub fn analyze(
        &self,
        execution_id: &str,
        keys: Option<&KeyRegistry>,
    ) -> Result<Option<RecoveryAnalysis>, StoreError> {
        let reader = WalReader::load_execution(&self.layout.wal_dir(), execution_id)?;

        if let Err(err) = reader.verify(keys, false) {
            warn!(execution_id, error = %err, "WAL failed integrity check during recovery");
            return Ok(Some(RecoveryAnalysis {
                execution_id: execution_id.to_string(),
                decision: RecoveryDecision::Block,
                reason: "wal_corrupted".into(),
                pending_step_id: None,
                pending_agent: None,
                pending_side_effect: None,
                resume_from_step: None,
                completed_steps: Vec::new(),
            }));
        }

        if reader.is_complete() {
            return Ok(None);
        }

        let completed_steps = reader.completed_step_ids();
        let analysis = match reader.pending_step() {
            None => RecoveryAnalysis {
                execution_id: execution_id.to_string(),
                decision: RecoveryDecision::Resume,
                reason: "no_pending_step".into(),
                pending_step_id: None,
                pending_agent: None,
                pending_side_effect: None,
                resume_from_step: completed_steps.last().cloned(),
                completed_steps,
            },
            Some(pending) => Self::classify_pending(execution_id, pending, completed_steps),
        };
        Ok(Some(analysis))
    }

    fn classify_pending(
        execution_id: &str,
        pending: &WalEntry,
        completed_steps: Vec<String>,
    ) -> RecoveryAnalysis {
        let step_id = pending.step_id().map(str::to_string);
        let agent = pending.agent_name().map(str::to_string);
        let side_effect_str = pending
            .payload
            .get("sideEffect")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        let (decision, reason) = match side_effect_str.as_deref() {
            s if s == Some(SideEffectClass::ReadOnly.as_str()) => {
                (RecoveryDecision::Resume, "read_only_in_flight")
            }
            s if s == Some(SideEffectClass::Reversible.as_str()) => {
                (RecoveryDecision::Resume, "reversible_in_flight")
            }
            s if s == Some(SideEffectClass::Irreversible.as_str()) => {
                (RecoveryDecision::Block, "irreversible_in_flight")
            }
            // Conservative default for anything we cannot classify.
            _ => (RecoveryDecision::Block, "unclassified_side_effect"),
        };

        RecoveryAnalysis {
            execution_id: execution_id.to_string(),
            decision,
            reason: reason.into(),
            resume_from_step: if decision == RecoveryDecision::Resume {
                step_id.clone()
            } else {
                None
            },
            pending_step_id: step_id,
            pending_agent: agent,
            pending_side_effect: side_effect_str,
            completed_steps,
        }
    }

    /// Mark an incomplete execution aborted: appends `recovery.started`
    /// and `execution.aborted` to its WAL.
    pub fn abort(&self, execution_id: &str, reason: &str) -> Result<(), StoreError> {
        let mut writer = WalWriter::open_existing(&self.layout.wal_dir(), execution_id, None)?;
        writer.recovery_started("aborting", reason)?;
        writer.execution_aborted(reason)?;
        info!(execution_id, reason, "execution aborted");
        Ok(())
    }
}
