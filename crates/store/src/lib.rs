use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

const MAX_KEY_LENGTH: usize = 128;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid store key: {0}")]
    InvalidKey(String),
}

/// Client-local key-value persistence.
///
/// Values are opaque strings; callers own their encoding. Implementations must
/// be usable from synchronous code paths (frame dispatch never awaits).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Read and decode a JSON value stored under `key`.
    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        Self: Sized,
    {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encode `value` as JSON and store it under `key`.
    fn put_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError>
    where
        Self: Sized,
    {
        let raw = serde_json::to_string(value)?;
        self.put(key, &raw)
    }
}

/// One JSON file per key inside a single directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, StoreError> {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        let dir = std::fs::canonicalize(dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        let path = self.dir.join(format!("{}.json", key));
        let parent = path.parent().ok_or_else(|| {
            StoreError::InvalidKey("failed to resolve key file parent".to_string())
        })?;
        if parent != self.dir {
            return Err(StoreError::InvalidKey(
                "key resolves outside the store directory".to_string(),
            ));
        }
        Ok(path)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.key_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Process-local store, used when nothing should touch the disk.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        Ok(self.values.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.values.lock().remove(key);
        Ok(())
    }
}

/// Keys double as file stems, so they are held to the same rules everywhere.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.trim().is_empty() {
        return Err(StoreError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(StoreError::InvalidKey(format!(
            "key too long (max {})",
            MAX_KEY_LENGTH
        )));
    }
    if key == "." || key == ".." || key.contains("..") {
        return Err(StoreError::InvalidKey(
            "key cannot contain path traversal sequence".to_string(),
        ));
    }
    if key.contains('/') || key.contains('\\') {
        return Err(StoreError::InvalidKey(
            "key cannot contain path separators".to_string(),
        ));
    }
    if !key
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':'))
    {
        return Err(StoreError::InvalidKey(
            "key contains unsupported characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_rejects_traversal() {
        assert!(validate_key("../etc").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("a\\b").is_err());
        assert!(validate_key("  ").is_err());
        assert!(validate_key("notif ications").is_err());
    }

    #[test]
    fn test_validate_key_accepts_plain_names() {
        assert!(validate_key("notifications").is_ok());
        assert!(validate_key("doctor-12:2025-03-10").is_ok());
    }

    #[test]
    fn test_validate_key_length_limit() {
        let long = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(validate_key(&long), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_memory_store_roundtrip_and_remove() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.put("alpha", "1").unwrap();
        assert_eq!(store.get("alpha").unwrap().as_deref(), Some("1"));
        store.remove("alpha").unwrap();
        assert_eq!(store.get("alpha").unwrap(), None);
        // removing twice is fine
        store.remove("alpha").unwrap();
    }

    #[test]
    fn test_memory_store_json_helpers() {
        let store = MemoryStore::new();
        store.put_json("list", &vec![1, 2, 3]).unwrap();
        let back: Option<Vec<i32>> = store.get_json("list").unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
    }
}
