use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use intentus_crypto::KeyRegistry;

use crate::entry::{WalEntry, WalEntryType};
use crate::error::{IntegrityKind, WalError};

/// Verifying WAL reader.
///
/// Loads entries in order and tolerates a torn final line (crash during
/// append): a line that fails to parse or lacks an entry hash marks the
/// log as "truncated after seq N" and everything before it stays usable.
pub struct WalReader {
    path: PathBuf,
    entries: Vec<WalEntry>,
    truncated_after: Option<u64>,
}

impl WalReader {
    pub fn load(path: &Path) -> Result<Self, WalError> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WalError::NotFound(path.display().to_string())
            } else {
                WalError::Io(e)
            }
        })?;

        let mut entries = Vec::new();
        let mut truncated_after = None;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalEntry>(&line) {
                Ok(entry) if !entry.entry_hash.is_empty() => entries.push(entry),
                _ => {
                    let last_seq = entries.last().map(|e| e.seq).unwrap_or(0);
                    warn!(
                        path = %path.display(),
                        last_seq,
                        "torn WAL tail detected, treating as truncated"
                    );
                    truncated_after = Some(last_seq);
                    break;
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            truncated_after,
        })
    }

    /// Load the WAL for one execution id out of a directory.
    pub fn load_execution(wal_dir: &Path, execution_id: &str) -> Result<Self, WalError> {
        let path = wal_dir.join(format!("{execution_id}.wal"));
        if !path.exists() {
            return Err(WalError::NotFound(execution_id.to_string()));
        }
        Self::load(&path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[WalEntry] {
        &self.entries
    }

    pub fn truncated_after(&self) -> Option<u64> {
        self.truncated_after
    }

    /// Verify sequence contiguity, the hash chain, entry hashes, and
    /// signatures. `require_signatures` makes an unsigned entry a failure
    /// (REGULATED verification).
    pub fn verify(
        &self,
        keys: Option<&KeyRegistry>,
        require_signatures: bool,
    ) -> Result<(), WalError> {
        let mut prev_hash: Option<&str> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            let expected_seq = i as u64 + 1;
            if entry.seq != expected_seq {
                return Err(WalError::Integrity {
                    kind: IntegrityKind::SeqGap,
                    seq: entry.seq,
                });
            }

            if entry.prev_hash.as_deref() != prev_hash {
                return Err(WalError::Integrity {
                    kind: IntegrityKind::HashChainBroken,
                    seq: entry.seq,
                });
            }

            if entry.compute_hash() != entry.entry_hash {
                return Err(WalError::Integrity {
                    kind: IntegrityKind::EntryHashInvalid,
                    seq: entry.seq,
                });
            }

            match (&entry.signature, &entry.signer_key_id) {
                (Some(signature), Some(key_id)) => {
                    let Some(registry) = keys else {
                        return Err(WalError::Integrity {
                            kind: IntegrityKind::SignatureInvalid,
                            seq: entry.seq,
                        });
                    };
                    if registry
                        .verify(entry.entry_hash.as_bytes(), signature, key_id)
                        .is_err()
                    {
                        return Err(WalError::Integrity {
                            kind: IntegrityKind::SignatureInvalid,
                            seq: entry.seq,
                        });
                    }
                }
                (None, None) if !require_signatures => {}
                _ => {
                    return Err(WalError::Integrity {
                        kind: IntegrityKind::SignatureInvalid,
                        seq: entry.seq,
                    });
                }
            }

            prev_hash = Some(entry.entry_hash.as_str());
        }
        Ok(())
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.entries.first().map(|e| e.execution_id.as_str())
    }

    pub fn started(&self) -> Option<&WalEntry> {
        self.entries
            .iter()
            .find(|e| e.entry_type == WalEntryType::ExecutionStarted)
    }

    /// The terminal entry, if the execution reached one.
    pub fn terminal(&self) -> Option<&WalEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.entry_type.is_terminal())
    }

    pub fn is_complete(&self) -> bool {
        self.terminal().is_some()
    }

    /// The last `step.started` entry with no resolving entry: the
    /// in-flight step after a crash.
    pub fn pending_step(&self) -> Option<&WalEntry> {
        let mut pending: Option<&WalEntry> = None;
        for entry in &self.entries {
            match entry.entry_type {
                WalEntryType::StepStarted => pending = Some(entry),
                t if t.resolves_step() => {
                    if pending.and_then(WalEntry::step_id) == entry.step_id() {
                        pending = None;
                    }
                }
                _ => {}
            }
        }
        pending
    }

    /// Step ids with a `step.completed` entry, in completion order.
    pub fn completed_step_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.entry_type == WalEntryType::StepCompleted)
            .filter_map(|e| e.step_id().map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WalWriter;
    use intentus_crypto::WalSigner;
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;

    fn write_sample(dir: &Path, execution_id: &str) -> PathBuf {
        let mut writer = WalWriter::create(dir, execution_id, None).unwrap();
        writer
            .execution_started("envhash", "sum", "cfg", true)
            .unwrap();
        writer
            .step_started("step-1", "A", "read_only", json!({}), "in")
            .unwrap();
        writer.step_completed("step-1", "A", "out").unwrap();
        writer.execution_completed("resphash", "fp").unwrap();
        writer.path().to_path_buf()
    }

    #[test]
    fn verify_accepts_intact_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "exec-1");
        let reader = WalReader::load(&path).unwrap();
        reader.verify(None, false).unwrap();
        assert!(reader.is_complete());
        assert_eq!(reader.completed_step_ids(), vec!["step-1".to_string()]);
        assert!(reader.pending_step().is_none());
    }

    #[test]
    fn flipping_a_payload_byte_fails_at_that_seq() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "exec-1");

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        // Flip one byte in line 2 (seq 2): change the agent name.
        lines[1] = lines[1].replacen("\"agentName\":\"A\"", "\"agentName\":\"B\"", 1);
        let mut file = File::create(&path).unwrap();
        writeln!(file, "{}", lines.join("\n")).unwrap();

        let reader = WalReader::load(&path).unwrap();
        let err = reader.verify(None, false).unwrap_err();
        match err {
            WalError::Integrity { kind, seq } => {
                assert_eq!(kind, IntegrityKind::EntryHashInvalid);
                assert_eq!(seq, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn broken_chain_link_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "exec-1");

        let text = std::fs::read_to_string(&path).unwrap();
        let mut entries: Vec<WalEntry> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        // Rewrite entry 3 with a forged prev hash and a recomputed entry
        // hash, so only the chain linkage is wrong.
        entries[2].prev_hash = Some("0".repeat(64));
        entries[2].entry_hash = entries[2].compute_hash();
        let mut file = File::create(&path).unwrap();
        for entry in &entries {
            writeln!(file, "{}", serde_json::to_string(entry).unwrap()).unwrap();
        }

        let reader = WalReader::load(&path).unwrap();
        let err = reader.verify(None, false).unwrap_err();
        assert_eq!(err.integrity_kind(), Some(IntegrityKind::HashChainBroken));
    }

    #[test]
    fn torn_tail_is_truncation_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "exec-1");

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"seq\":5,\"truncat").unwrap();
        drop(file);

        let reader = WalReader::load(&path).unwrap();
        assert_eq!(reader.truncated_after(), Some(4));
        assert_eq!(reader.entries().len(), 4);
        reader.verify(None, false).unwrap();
    }

    #[test]
    fn seq_gap_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "exec-1");

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // Drop line 2 entirely.
        let mut file = File::create(&path).unwrap();
        for (i, line) in lines.iter().enumerate() {
            if i != 1 {
                writeln!(file, "{line}").unwrap();
            }
        }

        let reader = WalReader::load(&path).unwrap();
        let err = reader.verify(None, false).unwrap_err();
        assert_eq!(err.integrity_kind(), Some(IntegrityKind::SeqGap));
    }

    #[test]
    fn unsigned_log_fails_regulated_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "exec-1");
        let reader = WalReader::load(&path).unwrap();
        let err = reader.verify(None, true).unwrap_err();
        assert_eq!(err.integrity_kind(), Some(IntegrityKind::SignatureInvalid));
    }

    #[test]
    fn signed_log_verifies_against_registry() {
        let dir = tempfile::tempdir().unwrap();
        let signer = Arc::new(WalSigner::from_bytes(&[42u8; 32]));
        let mut registry = intentus_crypto::KeyRegistry::new();
        registry.add_from_signer(&signer);

        let mut writer = WalWriter::create(dir.path(), "exec-1", Some(signer)).unwrap();
        writer
            .execution_started("envhash", "sum", "cfg", true)
            .unwrap();
        writer.execution_completed("resphash", "fp").unwrap();

        let reader = WalReader::load(writer.path()).unwrap();
        reader.verify(Some(&registry), true).unwrap();
    }

    #[test]
    fn pending_step_survives_unresolved_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = WalWriter::create(dir.path(), "exec-1", None).unwrap();
        writer
            .execution_started("envhash", "transfer", "cfg", true)
            .unwrap();
        writer
            .step_started("step-1", "Mover", "irreversible", json!({}), "in")
            .unwrap();
        // Crash here: no completion, no terminal entry.

        let reader = WalReader::load(writer.path()).unwrap();
        assert!(!reader.is_complete());
        let pending = reader.pending_step().unwrap();
        assert_eq!(pending.step_id(), Some("step-1"));
        assert_eq!(
            pending.payload["sideEffect"].as_str(),
            Some("irreversible")
        );
    }
}
