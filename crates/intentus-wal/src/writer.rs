use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use intentus_crypto::WalSigner;

use crate::entry::{WalEntry, WalEntryType, WAL_VERSION};
use crate::error::WalError;

/// Append-only WAL writer with fsync on every append.
///
/// The fsync return is the durability commit boundary: once `append`
/// returns, the entry survives a crash; before that, loss is possible and
/// expected. Exclusive write access per execution is the caller's job
/// (the execution lock).
#[derive(Debug)]
pub struct WalWriter {
    path: PathBuf,
    execution_id: String,
    file: File,
    seq: u64,
    last_hash: Option<String>,
    signer: Option<Arc<WalSigner>>,
}

impl WalWriter {
    /// Create the WAL for a new execution. Fails if one already exists.
    pub fn create(
        wal_dir: &Path,
        execution_id: &str,
        signer: Option<Arc<WalSigner>>,
    ) -> Result<Self, WalError> {
        std::fs::create_dir_all(wal_dir)?;
        let path = wal_dir.join(format!("{execution_id}.wal"));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    WalError::AlreadyExists(execution_id.to_string())
                } else {
                    WalError::Io(e)
                }
            })?;

        Ok(Self {
            path,
            execution_id: execution_id.to_string(),
            file,
            seq: 0,
            last_hash: None,
            signer,
        })
    }

    /// Open an existing WAL for appending (recovery markers, aborts).
    ///
    /// Scans to the last fully newline-terminated valid entry to resume
    /// seq and chain position, and truncates any torn tail left by a
    /// crash so the next append starts on a clean line.
    pub fn open_existing(
        wal_dir: &Path,
        execution_id: &str,
        signer: Option<Arc<WalSigner>>,
    ) -> Result<Self, WalError> {
        let path = wal_dir.join(format!("{execution_id}.wal"));
        if !path.exists() {
            return Err(WalError::NotFound(execution_id.to_string()));
        }

        let text = std::fs::read_to_string(&path)?;
        let mut seq = 0;
        let mut last_hash = None;
        let mut valid_end = 0usize;
        for line in text.split_inclusive('\n') {
            let trimmed = line.trim_end_matches('\n');
            if !line.ends_with('\n') {
                break;
            }
            match serde_json::from_str::<WalEntry>(trimmed) {
                Ok(entry) if !entry.entry_hash.is_empty() => {
                    seq = entry.seq;
                    last_hash = Some(entry.entry_hash);
                    valid_end += line.len();
                }
                _ => break,
            }
        }

        let file = OpenOptions::new().append(true).open(&path)?;
        if (valid_end as u64) < text.len() as u64 {
            warn!(
                execution_id,
                valid_bytes = valid_end,
                total_bytes = text.len(),
                "truncating torn WAL tail before appending"
            );
            file.set_len(valid_end as u64)?;
        }

        Ok(Self {
            path,
            execution_id: execution_id.to_string(),
            file,
            seq,
            last_hash,
            signer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_signing_enabled(&self) -> bool {
        self.signer.is_some()
    }

    /// Append one entry: serialize, hash, optionally sign, write, flush,
    /// fsync. The chain state advances only after the fsync succeeds.
    pub fn append(
        &mut self,
        entry_type: WalEntryType,
        payload: Value,
    ) -> Result<WalEntry, WalError> {
        let mut entry = WalEntry {
            seq: self.seq + 1,
            execution_id: self.execution_id.clone(),
            timestamp_iso: chrono::Utc::now().to_rfc3339(),
            entry_type,
            payload,
            prev_hash: self.last_hash.clone(),
            entry_hash: String::new(),
            version: WAL_VERSION.to_string(),
            signature: None,
            signer_key_id: None,
        };
        entry.entry_hash = entry.compute_hash();

        if let Some(signer) = &self.signer {
            entry.signature = Some(signer.sign(entry.entry_hash.as_bytes()));
            entry.signer_key_id = Some(signer.key_id().to_string());
        }

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        // Durability commit boundary.
        self.file.sync_all()?;

        self.seq = entry.seq;
        self.last_hash = Some(entry.entry_hash.clone());

        debug!(
            execution_id = %self.execution_id,
            seq = entry.seq,
            entry_type = %entry.entry_type,
            "WAL entry appended"
        );
        Ok(entry)
    }

    // ── Typed append helpers ─────────────────────────────────────────

    pub fn execution_started(
        &mut self,
        envelope_hash: &str,
        intent_name: &str,
        config_hash: &str,
        require_determinism: bool,
    ) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::ExecutionStarted,
            json!({
                "executionId": self.execution_id,
                "envelopeHash": envelope_hash,
                "intentName": intent_name,
                "configHash": config_hash,
                "requireDeterminism": require_determinism,
            }),
        )
    }

    pub fn execution_completed(
        &mut self,
        response_hash: &str,
        fingerprint: &str,
    ) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::ExecutionCompleted,
            json!({
                "executionId": self.execution_id,
                "responseHash": response_hash,
                "fingerprint": fingerprint,
            }),
        )
    }

    pub fn execution_failed(
        &mut self,
        failure_type: &str,
        reason: &str,
        recoverable: bool,
    ) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::ExecutionFailed,
            json!({
                "executionId": self.execution_id,
                "failureType": failure_type,
                "reason": reason,
                "recoverable": recoverable,
            }),
        )
    }

    pub fn execution_aborted(&mut self, reason: &str) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::ExecutionAborted,
            json!({
                "executionId": self.execution_id,
                "reason": reason,
            }),
        )
    }

    /// Must be durable before the side effect it announces.
    pub fn step_started(
        &mut self,
        step_id: &str,
        agent_name: &str,
        side_effect: &str,
        contract: Value,
        input_hash: &str,
    ) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::StepStarted,
            json!({
                "stepId": step_id,
                "agentName": agent_name,
                "sideEffect": side_effect,
                "contract": contract,
                "inputHash": input_hash,
            }),
        )
    }

    pub fn step_completed(
        &mut self,
        step_id: &str,
        agent_name: &str,
        output_hash: &str,
    ) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::StepCompleted,
            json!({
                "stepId": step_id,
                "agentName": agent_name,
                "outputHash": output_hash,
                "success": true,
            }),
        )
    }

    pub fn step_failed(
        &mut self,
        step_id: &str,
        agent_name: &str,
        failure_type: &str,
        reason: &str,
        recoverable: bool,
    ) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::StepFailed,
            json!({
                "stepId": step_id,
                "agentName": agent_name,
                "failureType": failure_type,
                "reason": reason,
                "recoverable": recoverable,
            }),
        )
    }

    pub fn step_skipped(&mut self, step_id: &str, reason: &str) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::StepSkipped,
            json!({
                "stepId": step_id,
                "reason": reason,
            }),
        )
    }

    pub fn fallback_triggered(
        &mut self,
        from_agent: &str,
        to_agent: &str,
        reason: &str,
    ) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::FallbackTriggered,
            json!({
                "fromAgent": from_agent,
                "toAgent": to_agent,
                "reason": reason,
            }),
        )
    }

    pub fn fallback_exhausted(
        &mut self,
        attempts: usize,
        last_error: &str,
    ) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::FallbackExhausted,
            json!({
                "attempts": attempts,
                "lastError": last_error,
            }),
        )
    }

    pub fn contract_validated(
        &mut self,
        step_id: &str,
        contract: Value,
    ) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::ContractValidated,
            json!({
                "stepId": step_id,
                "contract": contract,
            }),
        )
    }

    pub fn contract_violated(
        &mut self,
        step_id: &str,
        reason: &str,
        detail: &str,
    ) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::ContractViolated,
            json!({
                "stepId": step_id,
                "reason": reason,
                "detail": detail,
            }),
        )
    }

    pub fn recovery_started(&mut self, state: &str, reason: &str) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::RecoveryStarted,
            json!({
                "executionId": self.execution_id,
                "state": state,
                "reason": reason,
            }),
        )
    }

    pub fn recovery_completed(&mut self, outcome: &str) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::RecoveryCompleted,
            json!({
                "executionId": self.execution_id,
                "outcome": outcome,
            }),
        )
    }

    pub fn checkpoint(
        &mut self,
        state: &str,
        completed_steps: &[String],
    ) -> Result<WalEntry, WalError> {
        self.append(
            WalEntryType::Checkpoint,
            json!({
                "state": state,
                "completedSteps": completed_steps,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::WalReader;
    use intentus_crypto::KeyRegistry;

    #[test]
    fn seq_is_contiguous_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = WalWriter::create(dir.path(), "exec-1", None).unwrap();

        let first = writer
            .execution_started("hash", "sum", "cfg", true)
            .unwrap();
        assert_eq!(first.seq, 1);
        assert!(first.prev_hash.is_none());

        let second = writer
            .step_started("step-1", "A", "read_only", json!({}), "input")
            .unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(second.prev_hash.as_deref(), Some(first.entry_hash.as_str()));
    }

    #[test]
    fn create_refuses_existing_wal() {
        let dir = tempfile::tempdir().unwrap();
        let _writer = WalWriter::create(dir.path(), "exec-1", None).unwrap();
        let err = WalWriter::create(dir.path(), "exec-1", None).unwrap_err();
        assert!(matches!(err, WalError::AlreadyExists(_)));
    }

    #[test]
    fn open_existing_resumes_chain() {
        let dir = tempfile::tempdir().unwrap();
        let last_hash = {
            let mut writer = WalWriter::create(dir.path(), "exec-1", None).unwrap();
            writer
                .execution_started("hash", "sum", "cfg", true)
                .unwrap();
            writer
                .step_started("step-1", "A", "irreversible", json!({}), "input")
                .unwrap()
                .entry_hash
        };

        let mut writer = WalWriter::open_existing(dir.path(), "exec-1", None).unwrap();
        assert_eq!(writer.seq(), 2);
        let abort = writer.execution_aborted("operator abort").unwrap();
        assert_eq!(abort.seq, 3);
        assert_eq!(abort.prev_hash.as_deref(), Some(last_hash.as_str()));

        let reader = WalReader::load(writer.path()).unwrap();
        reader.verify(None, false).unwrap();
    }

    #[test]
    fn open_existing_truncates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = WalWriter::create(dir.path(), "exec-1", None).unwrap();
            writer
                .execution_started("hash", "sum", "cfg", true)
                .unwrap();
        }

        // Crash mid-append: a partial line with no trailing newline.
        let path = dir.path().join("exec-1.wal");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"seq\":2,\"torn").unwrap();
        drop(file);

        let mut writer = WalWriter::open_existing(dir.path(), "exec-1", None).unwrap();
        assert_eq!(writer.seq(), 1);
        writer.execution_aborted("cleanup").unwrap();

        let reader = WalReader::load(&path).unwrap();
        reader.verify(None, false).unwrap();
        assert_eq!(reader.entries().len(), 2);
        assert!(reader.entries()[1].entry_type.is_terminal());
    }

    #[test]
    fn signed_entries_carry_key_id() {
        let dir = tempfile::tempdir().unwrap();
        let signer = Arc::new(WalSigner::from_bytes(&[42u8; 32]));
        let mut registry = KeyRegistry::new();
        registry.add_from_signer(&signer);

        let mut writer = WalWriter::create(dir.path(), "exec-1", Some(signer.clone())).unwrap();
        let entry = writer
            .execution_started("hash", "sum", "cfg", true)
            .unwrap();

        assert!(entry.is_signed());
        assert_eq!(entry.signer_key_id.as_deref(), Some(signer.key_id()));
        registry
            .verify(
                entry.entry_hash.as_bytes(),
                entry.signature.as_deref().unwrap(),
                signer.key_id(),
            )
            .unwrap();
    }
}
