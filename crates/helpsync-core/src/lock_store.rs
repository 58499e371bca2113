//! Lock Store (C5): persists and retrieves the whole Lock as a single
//! JSON-serialized value under a fixed key.
//!
//! The backend is a trait rather than a concrete file format, so a networked
//! KV store (Redis, etc.) can be swapped in later without touching the
//! Orchestrator.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde_json::Value;

use crate::error::LockError;
use crate::types::Lock;

/// Pluggable single-blob KV backend for the Lock.
pub trait KvBlobStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, LockError>;
    fn put(&self, key: &str, value: &str) -> Result<(), LockError>;
}

/// Read the Lock from `key`, defaulting to an empty map when the key is
/// absent (cold start: nothing has ever been committed).
pub fn get_lock(store: &dyn KvBlobStore, key: &str) -> Result<Lock, LockError> {
    let Some(raw) = store.get(key)? else {
        return Ok(Lock::new());
    };
    deserialize_lock(&raw)
}

/// Write the whole Lock as a single JSON object under `key`.
pub fn put_lock(store: &dyn KvBlobStore, key: &str, lock: &Lock) -> Result<(), LockError> {
    let serialized = serde_json::to_string(lock).map_err(|e| LockError::Write(e.to_string()))?;
    store.put(key, &serialized)
}

/// Coerce a serialized JSON object into `{i64 -> String}`, failing with
/// `CorruptLock` on any non-integer key or `CorruptLockValue` on any
/// non-string value.
fn deserialize_lock(raw: &str) -> Result<Lock, LockError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| LockError::Read(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(LockError::Read("lock value is not a JSON object".to_string()));
    };

    let mut lock = BTreeMap::new();
    for (key, value) in map {
        let id: i64 = key
            .parse()
            .map_err(|_| LockError::CorruptLock(key.clone()))?;
        let hash = value
            .as_str()
            .ok_or_else(|| LockError::CorruptLockValue(key.clone()))?
            .to_string();
        lock.insert(id, hash);
    }
    Ok(lock)
}

/// Filesystem-backed default implementation: the Lock is a single JSON
/// file per key under `state_dir`, written atomically via a temp file +
/// rename (the single-host equivalent of the backend's atomic SET).
pub struct FileBlobStore {
    state_dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", sanitize_key(key)))
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl KvBlobStore for FileBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>, LockError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| LockError::Read(e.to_string()))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), LockError> {
        fs::create_dir_all(&self.state_dir).map_err(|e| LockError::Write(e.to_string()))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(|e| LockError::Write(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| LockError::Write(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn get_lock_defaults_to_empty_on_cold_start() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().to_path_buf());
        let lock = get_lock(&store, "lock:all").unwrap();
        assert!(lock.is_empty());
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().to_path_buf());
        let mut lock = Lock::new();
        lock.insert(1, "abc".to_string());
        lock.insert(2, "def".to_string());

        put_lock(&store, "lock:all", &lock).unwrap();
        let loaded = get_lock(&store, "lock:all").unwrap();

        assert_eq!(loaded, lock);
    }

    #[test]
    fn corrupt_non_integer_key_is_rejected() {
        let raw = r#"{"not-an-int": "abc"}"#;
        let err = deserialize_lock(raw).unwrap_err();
        assert!(matches!(err, LockError::CorruptLock(_)));
    }

    #[test]
    fn corrupt_non_string_value_is_rejected() {
        let raw = r#"{"1": 123}"#;
        let err = deserialize_lock(raw).unwrap_err();
        assert!(matches!(err, LockError::CorruptLockValue(_)));
    }

    #[test]
    fn put_overwrites_previous_value() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().to_path_buf());

        let mut first = Lock::new();
        first.insert(1, "a".to_string());
        put_lock(&store, "lock:all", &first).unwrap();

        let mut second = Lock::new();
        second.insert(2, "b".to_string());
        put_lock(&store, "lock:all", &second).unwrap();

        let loaded = get_lock(&store, "lock:all").unwrap();
        assert_eq!(loaded, second);
    }
}
