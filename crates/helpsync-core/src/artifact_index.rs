//! Artifact Index (C7): the `{articleId -> artifactId}` mapping, backed
//! by a hash-style KV structure so partial updates don't require a
//! read-modify-write of unrelated entries.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::error::IndexError;
use crate::types::ArtifactIndexMap;

/// Pluggable hash-style KV backend for the ArtifactIndex.
pub trait KvHashStore: Send + Sync {
    fn get_all(&self, key: &str) -> Result<BTreeMap<String, String>, IndexError>;
    fn set_many(&self, key: &str, entries: &BTreeMap<String, String>) -> Result<(), IndexError>;
    fn remove_many(&self, key: &str, subkeys: &[String]) -> Result<(), IndexError>;
}

/// Read the whole ArtifactIndex.
pub fn get_all(store: &dyn KvHashStore, key: &str) -> Result<ArtifactIndexMap, IndexError> {
    let raw = store.get_all(key)?;
    let mut map = ArtifactIndexMap::new();
    for (k, v) in raw {
        if let Ok(id) = k.parse::<i64>() {
            map.insert(id, v);
        }
    }
    Ok(map)
}

/// Merge `entries` into the ArtifactIndex without touching unrelated
/// subkeys.
pub fn set_many(
    store: &dyn KvHashStore,
    key: &str,
    entries: &BTreeMap<i64, String>,
) -> Result<(), IndexError> {
    if entries.is_empty() {
        return Ok(());
    }
    let stringified: BTreeMap<String, String> = entries
        .iter()
        .map(|(id, artifact_id)| (id.to_string(), artifact_id.clone()))
        .collect();
    store.set_many(key, &stringified)
}

/// Remove a set of article ids from the ArtifactIndex.
pub fn remove_many(store: &dyn KvHashStore, key: &str, ids: &[i64]) -> Result<(), IndexError> {
    if ids.is_empty() {
        return Ok(());
    }
    let subkeys: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    store.remove_many(key, &subkeys)
}

/// Filesystem-backed default implementation: the whole hash is stored as
/// one JSON file per key under `state_dir`. Partial-update semantics are
/// preserved at the API layer (callers never need to read unrelated
/// entries to add or remove a subset), even though the on-disk
/// representation here is a single file -- a single-instance file store is
/// enough for the baseline deployment, and a networked backend can be
/// swapped in later behind the same trait.
pub struct FileHashStore {
    state_dir: PathBuf,
}

impl FileHashStore {
    pub fn new(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", sanitize_key(key)))
    }

    fn read(&self, key: &str) -> Result<BTreeMap<String, String>, IndexError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&path).map_err(|e| IndexError::Read(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| IndexError::Read(e.to_string()))
    }

    fn write(&self, key: &str, map: &BTreeMap<String, String>) -> Result<(), IndexError> {
        fs::create_dir_all(&self.state_dir).map_err(|e| IndexError::Write(e.to_string()))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let serialized = serde_json::to_string(map).map_err(|e| IndexError::Write(e.to_string()))?;
        fs::write(&tmp, serialized).map_err(|e| IndexError::Write(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| IndexError::Write(e.to_string()))?;
        Ok(())
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl KvHashStore for FileHashStore {
    fn get_all(&self, key: &str) -> Result<BTreeMap<String, String>, IndexError> {
        self.read(key)
    }

    fn set_many(&self, key: &str, entries: &BTreeMap<String, String>) -> Result<(), IndexError> {
        let mut current = self.read(key)?;
        current.extend(entries.clone());
        self.write(key, &current)
    }

    fn remove_many(&self, key: &str, subkeys: &[String]) -> Result<(), IndexError> {
        let mut current = self.read(key)?;
        for subkey in subkeys {
            current.remove(subkey);
        }
        self.write(key, &current)
    }
}
