use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Resolved on-disk layout under one base directory.
#[derive(Clone, Debug)]
pub struct StoreLayout {
    base_dir: PathBuf,
}

impl StoreLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Create all subdirectories.
    pub fn ensure(&self) -> Result<(), StoreError> {
        for dir in [
            self.wal_dir(),
            self.records_dir(),
            self.locks_dir(),
            self.idempotency_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.base_dir.join("wal")
    }

    pub fn records_dir(&self) -> PathBuf {
        self.base_dir.join("records")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.base_dir.join("locks")
    }

    pub fn idempotency_dir(&self) -> PathBuf {
        self.base_dir.join("idempotency")
    }

    pub fn idempotency_index_path(&self) -> PathBuf {
        self.idempotency_dir().join("idempotency_index.json")
    }

    pub fn wal_path(&self, execution_id: &str) -> PathBuf {
        self.wal_dir().join(format!("{execution_id}.wal"))
    }

    pub fn record_path(&self, execution_id: &str) -> PathBuf {
        self.records_dir().join(format!("{execution_id}.json"))
    }

    /// Execution ids present in the WAL directory, sorted.
    pub fn list_executions(&self) -> Result<Vec<String>, StoreError> {
        let wal_dir = self.wal_dir();
        if !wal_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&wal_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".wal") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
