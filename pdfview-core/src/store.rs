use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use tracing::{debug, warn};

pub const PAGE_NUMBER_KEY: &str = "pageNum";
pub const DOCUMENT_DATA_KEY: &str = "pdfData";

/// String key-value area that survives restarts.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Replaces the whole value stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// One file per key under `root`, replaced atomically on write.
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            anyhow::bail!("invalid store key {:?}", key);
        }
        Ok(self.root.join(format!("{key}.value")))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to open state file {:?}", path))
            }
        };
        let mut buf = String::new();
        file.read_to_string(&mut buf)
            .with_context(|| format!("failed to read state file {:?}", path))?;
        Ok(Some(buf))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;
        let tmp = path.with_extension("value.tmp");
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp state file {:?}", tmp))?;
        file.write_all(value.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace state file {:?}", path))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {:?}", path)),
        }
    }
}

pub struct MemoryKeyValueStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.lock().remove(key);
        Ok(())
    }
}

/// Last viewed page and the bytes of the last loaded document.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Stored page number, or page 1 when absent or unreadable.
    pub fn last_page(&self) -> usize {
        let raw = match self.kv.get(PAGE_NUMBER_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return 1,
            Err(err) => {
                warn!(?err, "failed to read stored page number");
                return 1;
            }
        };
        match raw.trim().parse::<usize>() {
            Ok(page) if page >= 1 => page,
            _ => {
                warn!(value = %raw, "ignoring malformed stored page number");
                1
            }
        }
    }

    pub fn save_page(&self, page: usize) -> Result<()> {
        debug!(page, "persisting page number");
        self.kv.set(PAGE_NUMBER_KEY, &page.to_string())
    }

    pub fn document_bytes(&self) -> Option<Vec<u8>> {
        let encoded = match self.kv.get(DOCUMENT_DATA_KEY) {
            Ok(encoded) => encoded?,
            Err(err) => {
                warn!(?err, "failed to read stored document");
                return None;
            }
        };
        match BASE64.decode(encoded.trim()) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(?err, "stored document is not valid base64");
                None
            }
        }
    }

    pub fn save_document(&self, bytes: &[u8]) -> Result<()> {
        debug!(len = bytes.len(), "persisting document bytes");
        self.kv.set(DOCUMENT_DATA_KEY, &BASE64.encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    fn memory_session() -> (Arc<MemoryKeyValueStore>, SessionStore) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let session = SessionStore::new(kv.clone());
        (kv, session)
    }

    #[test]
    fn last_page_defaults_to_first_page() {
        let (_, session) = memory_session();
        assert_eq!(session.last_page(), 1);
    }

    #[test]
    fn last_page_falls_back_on_garbage() {
        let (kv, session) = memory_session();
        kv.set(PAGE_NUMBER_KEY, "twelve").unwrap();
        assert_eq!(session.last_page(), 1);
        kv.set(PAGE_NUMBER_KEY, "0").unwrap();
        assert_eq!(session.last_page(), 1);
        kv.set(PAGE_NUMBER_KEY, "-3").unwrap();
        assert_eq!(session.last_page(), 1);
    }

    #[test]
    fn page_number_is_stored_as_decimal_string() {
        let (kv, session) = memory_session();
        session.save_page(42).unwrap();
        assert_eq!(kv.get(PAGE_NUMBER_KEY).unwrap().as_deref(), Some("42"));
        assert_eq!(session.last_page(), 42);
    }

    #[test]
    fn document_bytes_survive_non_text_content() {
        let (_, session) = memory_session();
        let bytes: Vec<u8> = (0..=255).collect();
        session.save_document(&bytes).unwrap();
        assert_eq!(session.document_bytes(), Some(bytes));
    }

    #[test]
    fn undecodable_document_is_treated_as_absent() {
        let (kv, session) = memory_session();
        kv.set(DOCUMENT_DATA_KEY, "%PDF-1.7 raw text").unwrap();
        assert_eq!(session.document_bytes(), None);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("state");

        let store = FileKeyValueStore::new(root.clone()).unwrap();
        store.set(PAGE_NUMBER_KEY, "3").unwrap();
        store.set(PAGE_NUMBER_KEY, "4").unwrap();
        drop(store);

        let reopened = FileKeyValueStore::new(root).unwrap();
        assert_eq!(reopened.get(PAGE_NUMBER_KEY).unwrap().as_deref(), Some("4"));
        reopened.remove(PAGE_NUMBER_KEY).unwrap();
        assert_eq!(reopened.get(PAGE_NUMBER_KEY).unwrap(), None);
        reopened.remove(PAGE_NUMBER_KEY).unwrap();
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let store = FileKeyValueStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.set("../escape", "x").is_err());
        assert!(store.get("").is_err());
    }
}
