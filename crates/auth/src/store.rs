//! Persistence for credential cooldowns.
//!
//! Records are keyed `provider:<last six characters of the secret>`; the full
//! secret is never written anywhere.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{Error, FailureReason, Result};

/// The persisted subset of a credential's failure state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownRecord {
    /// Epoch milliseconds.
    pub cooldown_until: i64,
    pub error_count: u32,
    pub last_reason: FailureReason,
    /// Epoch milliseconds.
    pub last_error_at: i64,
}

/// Backing store for cooldown records.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CooldownRecord>>;

    /// Insert or replace the record for `key`.
    async fn put(&self, key: &str, record: CooldownRecord) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Volatile store, used in tests and when persistence is disabled.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, CooldownRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CooldownStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CooldownRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &str, record: CooldownRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), record);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

/// A single JSON object on disk, rewritten atomically (temp file + rename) on
/// every change.
pub struct JsonFileStore {
    path: PathBuf,
    /// `None` until the file has been read once.
    cache: Mutex<Option<HashMap<String, CooldownRecord>>>,
    /// Serializes writers so a stale snapshot never overwrites a newer one.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cache: Mutex::new(None),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_loaded(&self) -> Result<()> {
        if self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
        {
            return Ok(());
        }

        let records = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => HashMap::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => {
                return Err(Error::Read {
                    path: self.path.clone(),
                    source,
                });
            },
        };
        debug!(path = %self.path.display(), count = records.len(), "loaded credential cooldowns");

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.is_none() {
            *cache = Some(records);
        }
        Ok(())
    }

    /// Apply `change` to the cached map and write the result to disk.
    async fn update(
        &self,
        change: impl FnOnce(&mut HashMap<String, CooldownRecord>),
    ) -> Result<()> {
        self.ensure_loaded().await?;
        let _guard = self.write_lock.lock().await;

        let data = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            let records = cache.get_or_insert_with(HashMap::new);
            change(records);
            serde_json::to_string_pretty(records)?
        };

        let write_err = |source| Error::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(write_err)?;
        Ok(())
    }
}

#[async_trait]
impl CooldownStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<CooldownRecord>> {
        self.ensure_loaded().await?;
        Ok(self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|records| records.get(key).cloned()))
    }

    async fn put(&self, key: &str, record: CooldownRecord) -> Result<()> {
        let key = key.to_string();
        self.update(move |records| {
            records.insert(key, record);
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let absent = self.get(key).await?.is_none();
        if absent {
            return Ok(());
        }
        self.update(|records| {
            records.remove(key);
        })
        .await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn record(until: i64) -> CooldownRecord {
        CooldownRecord {
            cooldown_until: until,
            error_count: 2,
            last_reason: FailureReason::RateLimit,
            last_error_at: until - 60_000,
        }
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cooldowns.json");

        let store = JsonFileStore::new(path.clone());
        store.put("openai:abc123", record(1_000_000)).await.unwrap();
        store.put("openai:zzz999", record(2_000_000)).await.unwrap();
        store.remove("openai:zzz999").await.unwrap();

        let reopened = JsonFileStore::new(path.clone());
        assert_eq!(
            reopened.get("openai:abc123").await.unwrap(),
            Some(record(1_000_000))
        );
        assert_eq!(reopened.get("openai:zzz999").await.unwrap(), None);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("cooldownUntil"));
        assert!(raw.contains("\"rate_limit\""));
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get("x:y").await.unwrap(), None);
        store.remove("x:y").await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::new(path);
        assert!(matches!(store.get("a:b").await, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.put("k", record(5)).await.unwrap();
        assert_eq!(store.len(), 1);
        store.remove("k").await.unwrap();
        assert!(store.is_empty());
    }
}
