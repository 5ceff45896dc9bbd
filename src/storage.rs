//! Durable local key-value storage for draft blobs.

use anyhow::Result;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Synchronous key-value surface the draft store persists through.
/// Implementations must tolerate being unavailable (missing directory,
/// quota) by returning errors; callers degrade to "no persistence".
pub trait DraftStorage: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Store or replace the value under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Delete the value under `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Stores each key as a JSON file under a directory.
pub struct FileDraftStorage {
    /// Directory holding one file per key.
    dir: PathBuf,
}

impl FileDraftStorage {
    /// Create a storage backed by the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File path for a key.
    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl DraftStorage for FileDraftStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        // Create the directory lazily so a fresh profile works.
        if !self.dir.as_os_str().is_empty() && !Path::new(&self.dir).exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        std::fs::write(self.path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory storage for tests and for sessions where no durable
/// storage is available (degrades to "survives nothing").
#[derive(Default)]
pub struct MemoryDraftStorage {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryDraftStorage {
    /// Create an empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DraftStorage for MemoryDraftStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_file_storage_roundtrip() {
        // ファイル実装で set/get/remove が往復する。
        let dir = std::env::temp_dir().join(format!("report-engine-test-{}", Uuid::new_v4()));
        let storage = FileDraftStorage::new(&dir);

        assert_eq!(storage.get("draft").unwrap(), None);
        storage.set("draft", "{\"a\":1}").unwrap();
        assert_eq!(storage.get("draft").unwrap().as_deref(), Some("{\"a\":1}"));

        storage.remove("draft").unwrap();
        assert_eq!(storage.get("draft").unwrap(), None);
        // 存在しないキーの削除はエラーにしない。
        storage.remove("draft").unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_memory_storage_roundtrip() {
        // メモリ実装でも同じ契約が成り立つ。
        let storage = MemoryDraftStorage::new();
        assert_eq!(storage.get("draft").unwrap(), None);
        storage.set("draft", "x").unwrap();
        assert_eq!(storage.get("draft").unwrap().as_deref(), Some("x"));
        storage.remove("draft").unwrap();
        assert_eq!(storage.get("draft").unwrap(), None);
    }
}
