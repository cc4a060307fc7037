//! Durable, namespaced key/value store backing every checkpoint.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/
//! ├── last_namespace.json          # the namespace of the most recent run
//! └── ns/<namespace-key>/<tag-key>.json
//! ```
//!
//! Each record is its own file, so a `put` only ever rewrites one key. Writes
//! go to a uniquely named temp file in the same directory, are fsynced, then
//! renamed over the target. Readers see either the previous record or the new
//! one, never a partial write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::CheckpointError;

/// Namespace reported when no run was ever recorded.
pub const DEFAULT_NAMESPACE: &str = "default";

const LAST_NAMESPACE_FILE: &str = "last_namespace.json";
const NAMESPACES_DIR: &str = "ns";

pub type StoreResult<T> = std::result::Result<T, CheckpointError>;

/// One persisted `(namespace, tag) -> payload` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub namespace: String,
    pub tag: String,
    pub saved_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Handle to the on-disk store. Cheap to clone; clones address the same files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Open a store rooted at `root`. Nothing is created until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether any data has been persisted. Never creates the store.
    pub fn exists(&self) -> bool {
        fs::read_dir(&self.root)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Persist `payload` under `(namespace, tag)`, replacing any prior record.
    pub fn put<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        tag: &str,
        payload: &T,
    ) -> StoreResult<()> {
        let payload = serde_json::to_value(payload).map_err(|source| CheckpointError::Serialize {
            tag: tag.to_string(),
            source,
        })?;
        let record = CheckpointRecord {
            namespace: namespace.to_string(),
            tag: tag.to_string(),
            saved_at: Utc::now(),
            payload,
        };
        let bytes =
            serde_json::to_vec_pretty(&record).map_err(|source| CheckpointError::Serialize {
                tag: tag.to_string(),
                source,
            })?;

        let path = self.record_path(namespace, tag);
        atomic_write(&path, &bytes)?;
        debug!(namespace, tag, path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    /// Return the last payload persisted under `(namespace, tag)`, or `None`.
    ///
    /// A record that exists but cannot be decoded as `T` is reported as
    /// [`CheckpointError::Corrupt`] so callers can decide to start over.
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, tag: &str) -> StoreResult<Option<T>> {
        let Some(record) = self.get_record(namespace, tag)? else {
            return Ok(None);
        };
        let path = self.record_path(namespace, tag);
        serde_json::from_value(record.payload)
            .map(Some)
            .map_err(|e| CheckpointError::Corrupt {
                path,
                message: e.to_string(),
            })
    }

    /// Return the raw record, including its metadata.
    pub fn get_record(&self, namespace: &str, tag: &str) -> StoreResult<Option<CheckpointRecord>> {
        let path = self.record_path(namespace, tag);
        read_json(&path)
    }

    /// Drop a single record. Missing records are not an error.
    pub fn remove(&self, namespace: &str, tag: &str) -> StoreResult<()> {
        let path = self.record_path(namespace, tag);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(path, e)),
        }
    }

    /// Delete all persisted data for every namespace.
    pub fn clear(&self) -> StoreResult<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                debug!(root = %self.root.display(), "Checkpoints cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(&self.root, e)),
        }
    }

    pub fn set_last_namespace(&self, namespace: &str) -> StoreResult<()> {
        let bytes = serde_json::to_vec(namespace).map_err(|source| CheckpointError::Serialize {
            tag: LAST_NAMESPACE_FILE.to_string(),
            source,
        })?;
        atomic_write(&self.root.join(LAST_NAMESPACE_FILE), &bytes)
    }

    /// The namespace of the most recent run, or [`DEFAULT_NAMESPACE`].
    pub fn get_last_namespace(&self) -> StoreResult<String> {
        let path = self.root.join(LAST_NAMESPACE_FILE);
        Ok(read_json::<String>(&path)?.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()))
    }

    /// Every record stored for `namespace`, ordered by save time.
    pub fn records(&self, namespace: &str) -> StoreResult<Vec<CheckpointRecord>> {
        let dir = self.namespace_dir(namespace);
        let mut records = read_records_in(&dir)?;
        records.sort_by_key(|r| r.saved_at);
        Ok(records)
    }

    /// All namespaces that hold at least one record.
    pub fn namespaces(&self) -> StoreResult<Vec<String>> {
        let dir = self.root.join(NAMESPACES_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::io(dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CheckpointError::io(&dir, e))?;
            if let Some(record) = read_records_in(&entry.path())?.into_iter().next() {
                names.push(record.namespace);
            }
        }
        names.sort();
        Ok(names)
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(NAMESPACES_DIR).join(key_component(namespace))
    }

    fn record_path(&self, namespace: &str, tag: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.json", key_component(tag)))
    }
}

/// Map an arbitrary name to a stable, filesystem-safe file stem.
///
/// Readable characters are kept; a hash suffix keeps distinct names distinct
/// after sanitizing (`a/b` and `a_b` must not collide).
pub(crate) fn key_component(raw: &str) -> String {
    let readable: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(48)
        .collect();
    let digest = Sha256::digest(raw.as_bytes());
    let hash = format!("{:x}", digest);
    format!("{}-{}", readable, &hash[..12])
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CheckpointError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn read_records_in(dir: &Path) -> StoreResult<Vec<CheckpointRecord>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CheckpointError::io(dir, e)),
    };

    let mut records = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| CheckpointError::io(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(record) = read_json::<CheckpointRecord>(&path)? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Write to a unique temp file next to `path`, fsync, then rename into place.
fn atomic_write(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| CheckpointError::io(dir, e))?;

    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("record"),
        uuid::Uuid::new_v4()
    );
    let temp_path = dir.join(temp_name);

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(CheckpointError::io(path, e));
    }
    sync_dir(dir).map_err(|e| CheckpointError::io(dir, e))
}

/// Flush a directory entry so a rename inside it survives power loss.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn make_store() -> (CheckpointStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints"));
        (store, dir)
    }

    #[test]
    fn test_exists_false_before_first_write_and_does_not_create() {
        let (store, _dir) = make_store();
        assert!(!store.exists());
        assert!(!store.root().exists());
        assert_eq!(store.get::<String>("run-A", "decompose").unwrap(), None);
        assert!(!store.root().exists());
    }

    #[test]
    fn test_put_then_get_round_trips_payload() {
        let (store, _dir) = make_store();
        store.put("run-A", "decompose", &vec!["p1", "p2"]).unwrap();
        assert!(store.exists());
        let got: Option<Vec<String>> = store.get("run-A", "decompose").unwrap();
        assert_eq!(got, Some(vec!["p1".to_string(), "p2".to_string()]));
    }

    #[test]
    fn test_put_replaces_and_leaves_other_keys_intact() {
        let (store, _dir) = make_store();
        store.put("run-A", "decompose", &json!({"n": 1})).unwrap();
        store.put("run-A", "generate", &json!({"processed": ["a"]})).unwrap();
        store
            .put("run-A", "generate", &json!({"processed": ["a", "b"]}))
            .unwrap();

        let decompose: serde_json::Value = store.get("run-A", "decompose").unwrap().unwrap();
        assert_eq!(decompose, json!({"n": 1}));
        let generate: serde_json::Value = store.get("run-A", "generate").unwrap().unwrap();
        assert_eq!(generate, json!({"processed": ["a", "b"]}));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let (store, _dir) = make_store();
        store.put("run-A", "decompose", &1).unwrap();
        store.put("run-B", "decompose", &2).unwrap();
        assert_eq!(store.get::<i32>("run-A", "decompose").unwrap(), Some(1));
        assert_eq!(store.get::<i32>("run-B", "decompose").unwrap(), Some(2));
        assert_eq!(
            store.namespaces().unwrap(),
            vec!["run-A".to_string(), "run-B".to_string()]
        );
    }

    #[test]
    fn test_last_namespace_defaults_then_persists() {
        let (store, _dir) = make_store();
        assert_eq!(store.get_last_namespace().unwrap(), DEFAULT_NAMESPACE);
        store.set_last_namespace("./generated/petstore").unwrap();
        assert_eq!(store.get_last_namespace().unwrap(), "./generated/petstore");
        // A fresh handle on the same root sees the value
        let reopened = CheckpointStore::new(store.root().to_path_buf());
        assert_eq!(reopened.get_last_namespace().unwrap(), "./generated/petstore");
    }

    #[test]
    fn test_clear_wipes_all_namespaces() {
        let (store, _dir) = make_store();
        store.put("run-A", "decompose", &1).unwrap();
        store.put("run-B", "setup", &2).unwrap();
        store.set_last_namespace("run-B").unwrap();

        store.clear().unwrap();

        assert!(!store.exists());
        assert_eq!(store.get_last_namespace().unwrap(), DEFAULT_NAMESPACE);
        assert_eq!(store.get::<i32>("run-A", "decompose").unwrap(), None);
        // Clearing an already empty store is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_wrong_shape_is_reported_as_corrupt() {
        let (store, _dir) = make_store();
        store.put("run-A", "decompose", &"not a list").unwrap();
        let err = store.get::<Vec<u32>>("run-A", "decompose").unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_truncated_file_is_reported_as_corrupt() {
        let (store, _dir) = make_store();
        store.put("run-A", "decompose", &1).unwrap();
        let path = store.record_path("run-A", "decompose");
        fs::write(&path, b"{\"namespace\": \"run-A\", ").unwrap();
        let err = store.get::<i32>("run-A", "decompose").unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let (store, _dir) = make_store();
        for i in 0..5 {
            store.put("run-A", "generate", &i).unwrap();
        }
        let dir = store.namespace_dir("run-A");
        let names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[test]
    fn test_records_lists_tags_in_save_order() {
        let (store, _dir) = make_store();
        store.put("run-A", "decompose", &1).unwrap();
        store.put("run-A", "setup_framework", &2).unwrap();
        let tags: Vec<String> = store
            .records("run-A")
            .unwrap()
            .into_iter()
            .map(|r| r.tag)
            .collect();
        assert_eq!(tags, vec!["decompose", "setup_framework"]);
    }

    #[test]
    fn test_remove_single_record() {
        let (store, _dir) = make_store();
        store.put("run-A", "decompose", &1).unwrap();
        store.remove("run-A", "decompose").unwrap();
        store.remove("run-A", "decompose").unwrap();
        assert_eq!(store.get::<i32>("run-A", "decompose").unwrap(), None);
    }

    #[test]
    fn test_key_component_is_safe_and_distinct() {
        let a = key_component("a/b");
        let b = key_component("a_b");
        assert_ne!(a, b);
        assert!(a.starts_with("a_b-"));
        assert!(!a.contains('/'));
        assert_eq!(key_component("run-A"), key_component("run-A"));
    }

    #[test]
    fn test_atomic_write_syncs_parent_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ns").join("tag.json");
        atomic_write(&path, b"{}").unwrap();
        atomic_write(&path, b"{\"v\": 2}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"v\": 2}");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        sync_dir(dir.path()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_dir_reports_missing_directory() {
        let dir = tempdir().unwrap();
        assert!(sync_dir(&dir.path().join("gone")).is_err());
    }
}
