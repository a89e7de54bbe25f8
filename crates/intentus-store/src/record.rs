use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use intentus_crypto::{canonical_bytes, hash_value};
use intentus_protocol::{AgentResponse, IntentRef};
use intentus_wal::{WalEntry, WalEntryType};

use crate::error::StoreError;
use crate::fsutil::atomic_write;
use crate::layout::StoreLayout;

/// One observed WAL event, mirrored into the execution record.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEvent {
    pub seq: u64,
    pub entry_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub timestamp_iso: String,
}

/// Immutable artifact summarizing one completed execution.
///
/// `record_hash` covers the canonical encoding of the record minus the
/// hash field itself; after finalization nothing may change.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub envelope_hash: String,
    pub intent: IntentRef,
    pub started_at: String,
    pub finished_at: String,
    pub events: Vec<RecordEvent>,
    pub response: AgentResponse,
    pub record_hash: String,
    pub finalized: bool,
    pub replayable: bool,
}

impl ExecutionRecord {
    /// Recompute the content hash (canonical record minus `recordHash`).
    pub fn compute_hash(&self) -> Result<String, StoreError> {
        let mut tree = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut tree {
            map.remove("recordHash");
        }
        Ok(hash_value(&tree))
    }

    pub fn verify_hash(&self) -> Result<bool, StoreError> {
        Ok(self.compute_hash()? == self.record_hash)
    }

    /// Step ids carried by `step.completed` events.
    pub fn completed_step_ids(&self) -> Vec<String> {
        self.events
            .iter()
            .filter(|e| e.entry_type == WalEntryType::StepCompleted.as_str())
            .filter_map(|e| e.step_id.clone())
            .collect()
    }
}

/// Builds the record alongside WAL writes, finalizing on the terminal
/// entry.
pub struct RecordBuilder {
    execution_id: String,
    envelope_hash: String,
    intent: IntentRef,
    started_at: String,
    events: Vec<RecordEvent>,
    replayable: bool,
}

impl RecordBuilder {
    pub fn new(execution_id: impl Into<String>, envelope_hash: impl Into<String>, intent: IntentRef) -> Self {
        Self {
            execution_id: execution_id.into(),
            envelope_hash: envelope_hash.into(),
            intent,
            started_at: chrono::Utc::now().to_rfc3339(),
            events: Vec::new(),
            replayable: true,
        }
    }

    /// Mirror one WAL entry into the record.
    pub fn observe(&mut self, entry: &WalEntry) {
        self.events.push(RecordEvent {
            seq: entry.seq,
            entry_type: entry.entry_type.as_str().to_string(),
            step_id: entry.step_id().map(str::to_string),
            agent_name: entry.agent_name().map(str::to_string),
            timestamp_iso: entry.timestamp_iso.clone(),
        });
    }

    pub fn mark_not_replayable(&mut self) {
        self.replayable = false;
    }

    /// Seal the record: set the final response, compute the record hash,
    /// mark finalized.
    pub fn finalize(self, response: AgentResponse) -> Result<ExecutionRecord, StoreError> {
        let mut record = ExecutionRecord {
            execution_id: self.execution_id,
            envelope_hash: self.envelope_hash,
            intent: self.intent,
            started_at: self.started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            events: self.events,
            response,
            record_hash: String::new(),
            finalized: true,
            replayable: self.replayable,
        };
        record.record_hash = record.compute_hash()?;
        Ok(record)
    }
}

/// Flat-file record store: one canonical JSON file per execution,
/// written atomically.
pub struct RecordStore {
    records_dir: PathBuf,
}

impl RecordStore {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            records_dir: layout.records_dir(),
        }
    }

    pub fn save(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let tree = serde_json::to_value(record)?;
        let path = self.records_dir.join(format!("{}.json", record.execution_id));
        atomic_write(&path, &canonical_bytes(&tree))?;
        info!(execution_id = %record.execution_id, "execution record persisted");
        Ok(())
    }

    pub fn load(&self, execution_id: &str) -> Result<ExecutionRecord, StoreError> {
        let path = self.records_dir.join(format!("{execution_id}.json"));
        let bytes = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::RecordNotFound(execution_id.to_string())
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn exists(&self, execution_id: &str) -> bool {
        self.records_dir
            .join(format!("{execution_id}.json"))
            .exists()
    }

    /// Execution ids with a persisted record, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.records_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.records_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_entry(seq: u64, entry_type: WalEntryType, payload: Value) -> WalEntry {
        let mut entry = WalEntry {
            seq,
            execution_id: "exec-1".into(),
            timestamp_iso: "2026-01-01T00:00:00+00:00".into(),
            entry_type,
            payload,
            prev_hash: None,
            entry_hash: String::new(),
            version: intentus_wal::WAL_VERSION.into(),
            signature: None,
            signer_key_id: None,
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }

    fn sample_record() -> ExecutionRecord {
        let mut builder = RecordBuilder::new("exec-1", "envhash", IntentRef::new("sum", "1.0"));
        builder.observe(&sample_entry(
            1,
            WalEntryType::ExecutionStarted,
            json!({"envelopeHash": "envhash"}),
        ));
        builder.observe(&sample_entry(
            2,
            WalEntryType::StepCompleted,
            json!({"stepId": "step-1", "agentName": "A", "outputHash": "out"}),
        ));
        builder
            .finalize(AgentResponse::success(json!({"sum": 42})))
            .unwrap()
    }

    #[test]
    fn finalized_record_hash_verifies() {
        let record = sample_record();
        assert!(record.finalized);
        assert!(record.verify_hash().unwrap());
    }

    #[test]
    fn mutated_record_fails_hash_check() {
        let mut record = sample_record();
        record.envelope_hash = "different".into();
        assert!(!record.verify_hash().unwrap());
    }

    #[test]
    fn record_roundtrips_through_store_byte_identically() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.ensure().unwrap();
        let store = RecordStore::new(&layout);

        let record = sample_record();
        store.save(&record).unwrap();
        let first_bytes = std::fs::read(layout.record_path("exec-1")).unwrap();

        let loaded = store.load("exec-1").unwrap();
        assert!(loaded.verify_hash().unwrap());
        assert_eq!(loaded.record_hash, record.record_hash);

        store.save(&loaded).unwrap();
        let second_bytes = std::fs::read(layout.record_path("exec-1")).unwrap();
        assert_eq!(first_bytes, second_bytes);
    }

    #[test]
    fn completed_step_ids_come_from_step_completed_events() {
        let record = sample_record();
        assert_eq!(record.completed_step_ids(), vec!["step-1".to_string()]);
    }

    #[test]
    fn missing_record_is_reported_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.ensure().unwrap();
        let store = RecordStore::new(&layout);
        assert!(matches!(
            store.load("missing").unwrap_err(),
            StoreError::RecordNotFound(_)
        ));
    }
}
