use std::collections::BTreeSet;

use serde::Serialize;

use intentus_crypto::KeyRegistry;
use intentus_protocol::AgentResponse;
use intentus_wal::WalReader;

use crate::error::StoreError;
use crate::layout::StoreLayout;
use crate::record::RecordStore;

/// Fixed clarification attached to every retrieval result: this is a
/// historical lookup, never re-execution.
pub const RETRIEVAL_WARNING: &str = "This is the recorded response from execution time. \
No agent code was executed and no routing occurred. \
To compare against current behavior, run `intentusnet executions diff`.";

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub execution_id: String,
    pub response: AgentResponse,
    pub envelope_hash: String,
    pub retrieved_at: String,
    pub warning: &'static str,
}

/// Pure lookup over records + WAL. Verifies integrity and record↔WAL
/// consistency before returning the stored response.
pub struct RetrievalEngine {
    layout: StoreLayout,
    records: RecordStore,
}

impl RetrievalEngine {
    pub fn new(layout: StoreLayout) -> Self {
        let records = RecordStore::new(&layout);
        Self { layout, records }
    }

    /// Return the stored response for an execution id.
    pub fn retrieve(
        &self,
        execution_id: &str,
        keys: Option<&KeyRegistry>,
    ) -> Result<RetrievalResult, StoreError> {
        let record = self.records.load(execution_id)?;

        if !record.verify_hash()? {
            return Err(StoreError::ConsistencyViolation {
                execution_id: execution_id.to_string(),
                reason: "record hash does not match record content".into(),
            });
        }
        if !record.finalized {
            return Err(StoreError::NotRetrievable {
                execution_id: execution_id.to_string(),
                reason: "record was never finalized".into(),
            });
        }
        if !record.replayable {
            return Err(StoreError::NotRetrievable {
                execution_id: execution_id.to_string(),
                reason: "record is marked not retrievable".into(),
            });
        }

        self.check_wal_consistency(execution_id, &record, keys)?;

        Ok(RetrievalResult {
            execution_id: execution_id.to_string(),
            response: record.response,
            envelope_hash: record.envelope_hash,
            retrieved_at: chrono::Utc::now().to_rfc3339(),
            warning: RETRIEVAL_WARNING,
        })
    }

    /// Cross-check a record against its WAL without returning the
    /// response (the `records verify` operation).
    pub fn verify(
        &self,
        execution_id: &str,
        keys: Option<&KeyRegistry>,
    ) -> Result<(), StoreError> {
        let record = self.records.load(execution_id)?;
        if !record.verify_hash()? {
            return Err(StoreError::ConsistencyViolation {
                execution_id: execution_id.to_string(),
                reason: "record hash does not match record content".into(),
            });
        }
        self.check_wal_consistency(execution_id, &record, keys)
    }

    fn check_wal_consistency(
        &self,
        execution_id: &str,
        record: &crate::record::ExecutionRecord,
        keys: Option<&KeyRegistry>,
    ) -> Result<(), StoreError> {
        let reader = WalReader::load_execution(&self.layout.wal_dir(), execution_id)?;
        reader.verify(keys, false)?;

        let started = reader.started().ok_or_else(|| StoreError::ConsistencyViolation {
            execution_id: execution_id.to_string(),
            reason: "WAL has no execution.started entry".into(),
        })?;
        let wal_envelope_hash = started
            .payload
            .get("envelopeHash")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if wal_envelope_hash != record.envelope_hash {
            return Err(StoreError::ConsistencyViolation {
                execution_id: execution_id.to_string(),
                reason: "envelope hash in record differs from execution.started".into(),
            });
        }

        // Every completed step in the WAL must appear exactly once in the
        // record, and the record may not invent steps.
        let wal_steps: BTreeSet<String> = reader.completed_step_ids().into_iter().collect();
        let record_step_list = record.completed_step_ids();
        let record_steps: BTreeSet<String> = record_step_list.iter().cloned().collect();
        if record_step_list.len() != record_steps.len() {
            return Err(StoreError::ConsistencyViolation {
                execution_id: execution_id.to_string(),
                reason: "record contains duplicate completed-step events".into(),
            });
        }
        if wal_steps != record_steps {
            return Err(StoreError::ConsistencyViolation {
                execution_id: execution_id.to_string(),
                reason: format!(
                    "completed steps differ between WAL ({}) and record ({})",
                    wal_steps.len(),
                    record_steps.len()
                ),
            });
        }
        Ok(())
    }
}
