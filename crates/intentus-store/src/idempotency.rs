use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;
use tracing::debug;

use intentus_crypto::hash_value;
use intentus_protocol::IntentEnvelope;

use crate::error::StoreError;
use crate::fsutil::atomic_write;

/// Persistent map from idempotency key to execution id.
///
/// Updates go through the atomic-write helper, so a crash mid-update
/// leaves either the old or the new index, never a torn file.
pub struct IdempotencyIndex {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl IdempotencyIndex {
    /// Load the index, starting empty if the file does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(Self { path, entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a key → execution id mapping and persist immediately.
    pub fn record(&mut self, key: &str, execution_id: &str) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), execution_id.to_string());
        let bytes = serde_json::to_vec_pretty(&self.entries)?;
        atomic_write(&self.path, &bytes)?;
        debug!(key, execution_id, "idempotency index updated");
        Ok(())
    }
}

/// Deterministic key for an envelope: the canonical hash of the envelope
/// minus its volatile parts (`routingMetadata`, trace/request ids and the
/// submission timestamp). Two submissions differing only in those fields
/// derive the same key.
pub fn derive_key(envelope: &IntentEnvelope) -> Result<String, StoreError> {
    let mut tree = serde_json::to_value(envelope)?;
    if let Value::Object(map) = &mut tree {
        map.remove("routingMetadata");
        if let Some(Value::Object(metadata)) = map.get_mut("metadata") {
            metadata.remove("traceId");
            metadata.remove("requestId");
            metadata.remove("timestamp");
        }
    }
    Ok(hash_value(&tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentus_protocol::IntentRef;
    use serde_json::Map;

    #[test]
    fn index_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idempotency_index.json");

        let mut index = IdempotencyIndex::load(&path).unwrap();
        assert!(index.is_empty());
        index.record("K1", "exec-1").unwrap();

        let reloaded = IdempotencyIndex::load(&path).unwrap();
        assert_eq!(reloaded.get("K1"), Some("exec-1"));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn derived_key_ignores_trace_id_and_routing_metadata() {
        let mut payload = Map::new();
        payload.insert("a".into(), Value::from(17));

        let mut first = IntentEnvelope::new(IntentRef::new("sum", "1.0"), payload.clone());
        let mut second = IntentEnvelope::new(IntentRef::new("sum", "1.0"), payload);
        second.metadata.trace_id = "different-trace".into();
        second.routing_metadata.decision_path.push("A".into());

        assert_eq!(
            derive_key(&first).unwrap(),
            derive_key(&second).unwrap()
        );

        // A payload change must change the key.
        first.payload.insert("b".into(), Value::from(1));
        assert_ne!(derive_key(&first).unwrap(), derive_key(&second).unwrap());
    }
}
