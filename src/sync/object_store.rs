//! Blob-store abstraction for cross-host replication.
//!
//! The engine only needs get/put/list with opaque version tokens for
//! optimistic updates. The production HTTPS client lives outside this crate;
//! [`DirStore`] (a directory of files) backs local setups and tests.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A fetched object: payload plus the version token it was read at.
#[derive(Debug, Clone)]
pub struct Blob {
    pub data: Vec<u8>,
    pub version: String,
}

/// Minimal blob surface. Implementations are expected to enforce a
/// 15-second call timeout; [`DirStore`] is local and exempt.
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, or `None` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<Blob>>;

    /// Write an object. `expected_version` carries the token from a prior
    /// `get` for optimistic concurrency: `None` means "create, must not
    /// exist"; a stale token fails the put. Returns the new version token.
    fn put(&self, key: &str, data: &[u8], expected_version: Option<&str>) -> Result<String>;

    /// Keys under a prefix.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Directory-backed store: each key is a relative file path under the root.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part == ".." || part.is_empty()) {
            bail!("invalid object key: {key:?}");
        }
        Ok(self.root.join(key))
    }
}

fn version_of(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    // First 16 hex chars are plenty for an opaque change token
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

impl ObjectStore for DirStore {
    fn get(&self, key: &str) -> Result<Option<Blob>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(data) => {
                let version = version_of(&data);
                Ok(Some(Blob { data, version }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    fn put(&self, key: &str, data: &[u8], expected_version: Option<&str>) -> Result<String> {
        let path = self.path_for(key)?;
        let current = match std::fs::read(&path) {
            Ok(existing) => Some(version_of(&existing)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        match (expected_version, current) {
            (None, Some(_)) => bail!("object {key} already exists"),
            (Some(expected), Some(ref current)) if expected != current => {
                bail!("version conflict on {key}: expected {expected}, found {current}")
            }
            (Some(expected), None) => {
                bail!("version conflict on {key}: expected {expected}, object is gone")
            }
            _ => {}
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        // Atomic replace so a concurrent reader never sees a torn object
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to rename into {}", path.display()))?;
        Ok(version_of(data))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        collect_keys(&self.root, &self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("failed to list {}", dir.display())),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_keys(root, &path, keys)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            keys.push(rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (DirStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        (DirStore::new(tmp.path()), tmp)
    }

    #[test]
    fn get_missing_is_none() {
        let (store, _tmp) = store();
        assert!(store.get("entries/nope.jsonl").unwrap().is_none());
    }

    #[test]
    fn create_then_get_round_trips() {
        let (store, _tmp) = store();
        let v1 = store.put("entries/m1.jsonl", b"line one\n", None).unwrap();
        let blob = store.get("entries/m1.jsonl").unwrap().unwrap();
        assert_eq!(blob.data, b"line one\n");
        assert_eq!(blob.version, v1);
    }

    #[test]
    fn create_over_existing_fails() {
        let (store, _tmp) = store();
        store.put("manifest.json", b"{}", None).unwrap();
        assert!(store.put("manifest.json", b"{}", None).is_err());
    }

    #[test]
    fn stale_version_is_rejected() {
        let (store, _tmp) = store();
        let v1 = store.put("k", b"first", None).unwrap();
        store.put("k", b"second", Some(&v1)).unwrap();
        // v1 is now stale
        assert!(store.put("k", b"third", Some(&v1)).is_err());
    }

    #[test]
    fn current_version_succeeds() {
        let (store, _tmp) = store();
        let v1 = store.put("k", b"first", None).unwrap();
        let v2 = store.put("k", b"second", Some(&v1)).unwrap();
        assert_ne!(v1, v2);
        assert_eq!(store.get("k").unwrap().unwrap().version, v2);
    }

    #[test]
    fn list_filters_by_prefix() {
        let (store, _tmp) = store();
        store.put("entries/m1.jsonl", b"a", None).unwrap();
        store.put("entries/m2.jsonl", b"b", None).unwrap();
        store.put("manifest.json", b"c", None).unwrap();

        let keys = store.list("entries/").unwrap();
        assert_eq!(keys, vec!["entries/m1.jsonl", "entries/m2.jsonl"]);
        assert_eq!(store.list("").unwrap().len(), 3);
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let (store, _tmp) = store();
        assert!(store.put("../escape", b"x", None).is_err());
        assert!(store.get("a//b").is_err());
    }
}
