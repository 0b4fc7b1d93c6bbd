use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Flat string-keyed persistence. Values are opaque JSON text.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Reads `key` as JSON. Missing keys, unreadable stores and corrupt values all
/// yield `default`.
pub async fn get_or_default<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
    default: T,
) -> T {
    match store.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring corrupt value for '{}': {}", key, e);
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            warn!("Failed to read '{}' from store: {:#}", key, e);
            default
        }
    }
}

pub async fn save<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value).with_context(|| format!("Failed to encode '{}'", key))?;
    store.set(key, &raw).await
}

// --- File Implementation ---

/// All keys live in a single JSON object on disk. Writes go through a
/// temporary sibling file and a rename.
pub struct FileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<BTreeMap<String, String>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(BTreeMap::new());
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&content) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!("Store file {:?} is corrupt, starting empty: {}", self.path, e);
                Ok(BTreeMap::new())
            }
        }
    }

    async fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(map)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace {:?}", self.path))?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        if map.remove(key).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }
}

// --- Memory Implementation ---

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Dialogue, DialogueLine, Speaker};

    fn sample_dialogue() -> Dialogue {
        let mut first = DialogueLine::new(Speaker::A, "Want to grab a coffee?");
        first.audio_url = Some("data:audio/mpeg;base64,SUQz".to_string());
        let second = DialogueLine::new(Speaker::B, "Sure, after the meeting.");
        Dialogue::new(
            "Coffee Break",
            vec![first, second],
            vec!["coffee".to_string(), "meeting".to_string()],
        )
    }

    #[tokio::test]
    async fn test_file_store_round_trip() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = FileStore::new(temp_dir.path().join("data").join("store.json"));

        let dialogues = vec![sample_dialogue()];
        save(&store, "dialogues", &dialogues).await?;

        let loaded: Vec<Dialogue> = get_or_default(&store, "dialogues", Vec::new()).await;
        assert_eq!(loaded, dialogues);

        // A fresh handle on the same file sees the same data.
        let reopened = FileStore::new(store.path().to_path_buf());
        let loaded_again: Vec<Dialogue> = get_or_default(&reopened, "dialogues", Vec::new()).await;
        assert_eq!(loaded_again, dialogues);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_key_uses_default() {
        let store = MemoryStore::new();
        let value: Vec<Dialogue> = get_or_default(&store, "dialogues", Vec::new()).await;
        assert!(value.is_empty());
        let key: String = get_or_default(&store, "deepseek_api_key", String::new()).await;
        assert_eq!(key, "");
    }

    #[tokio::test]
    async fn test_corrupt_value_uses_default() -> Result<()> {
        let store = MemoryStore::new();
        store.set("dialogues", "{not json").await?;
        let value: Vec<Dialogue> = get_or_default(&store, "dialogues", Vec::new()).await;
        assert!(value.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_file_is_treated_as_empty() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("store.json");
        std::fs::write(&path, "garbage")?;

        let store = FileStore::new(&path);
        assert_eq!(store.get("voice_config").await?, None);

        store.set("deepseek_api_key", "\"sk-test\"").await?;
        let key: String = get_or_default(&store, "deepseek_api_key", String::new()).await;
        assert_eq!(key, "sk-test");
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_key() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = FileStore::new(temp_dir.path().join("store.json"));
        store.set("a", "1").await?;
        store.set("b", "2").await?;
        store.remove("a").await?;
        assert_eq!(store.get("a").await?, None);
        assert_eq!(store.get("b").await?, Some("2".to_string()));
        Ok(())
    }
}
