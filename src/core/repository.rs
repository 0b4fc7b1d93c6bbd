use log::{info, warn};
use std::sync::Arc;

use crate::core::error::{AppError, AppResult};
use crate::core::state::{Dialogue, VoiceConfig};
use crate::core::store::{self, KeyValueStore};

pub const KEY_API_KEY: &str = "deepseek_api_key";
pub const KEY_VOICE_CONFIG: &str = "voice_config";
pub const KEY_DIALOGUES: &str = "dialogues";

/// Everything the application persists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppData {
    pub api_key: String,
    pub voice_config: VoiceConfig,
    pub dialogues: Vec<Dialogue>,
}

/// Typed access to the key-value store. Every read fills in defaults; single
/// dialogue mutations reload the full list and merge by id before writing.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn KeyValueStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> AppData {
        AppData {
            api_key: store::get_or_default(self.store.as_ref(), KEY_API_KEY, String::new()).await,
            voice_config: self.voice_config().await,
            dialogues: self.dialogues().await,
        }
    }

    pub async fn save(&self, data: &AppData) -> AppResult<()> {
        self.write(KEY_API_KEY, &data.api_key).await?;
        self.write(KEY_VOICE_CONFIG, &data.voice_config).await?;
        self.write(KEY_DIALOGUES, &data.dialogues).await
    }

    pub async fn api_key(&self) -> Option<String> {
        let key: String = store::get_or_default(self.store.as_ref(), KEY_API_KEY, String::new()).await;
        let key = key.trim().to_string();
        (!key.is_empty()).then_some(key)
    }

    pub async fn set_api_key(&self, key: &str) -> AppResult<()> {
        let key = key.trim();
        if key.is_empty() {
            self.store
                .remove(KEY_API_KEY)
                .await
                .map_err(AppError::Storage)
        } else {
            self.write(KEY_API_KEY, key).await
        }
    }

    pub async fn voice_config(&self) -> VoiceConfig {
        store::get_or_default(self.store.as_ref(), KEY_VOICE_CONFIG, VoiceConfig::default()).await
    }

    pub async fn set_voice_config(&self, config: &VoiceConfig) -> AppResult<()> {
        self.write(KEY_VOICE_CONFIG, config).await
    }

    pub async fn dialogues(&self) -> Vec<Dialogue> {
        store::get_or_default(self.store.as_ref(), KEY_DIALOGUES, Vec::new()).await
    }

    pub async fn save_dialogues(&self, dialogues: &[Dialogue]) -> AppResult<()> {
        self.write(KEY_DIALOGUES, dialogues).await
    }

    pub async fn find_dialogue(&self, id: &str) -> AppResult<Dialogue> {
        self.dialogues()
            .await
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Dialogue {}", id)))
    }

    /// Newest dialogues go first.
    pub async fn prepend_dialogues(&self, new_dialogues: &[Dialogue]) -> AppResult<Vec<Dialogue>> {
        let mut dialogues = new_dialogues.to_vec();
        dialogues.extend(self.dialogues().await);
        self.save_dialogues(&dialogues).await?;
        Ok(dialogues)
    }

    /// Replaces the stored dialogue with the same id, leaving every other
    /// entry untouched. Returns `false` if the dialogue was deleted meanwhile.
    pub async fn merge_dialogue(&self, dialogue: &Dialogue) -> AppResult<bool> {
        let mut dialogues = self.dialogues().await;
        let Some(slot) = dialogues.iter_mut().find(|d| d.id == dialogue.id) else {
            warn!("Dialogue {} no longer exists, not saving it", dialogue.id);
            return Ok(false);
        };
        *slot = dialogue.clone();
        self.save_dialogues(&dialogues).await?;
        Ok(true)
    }

    pub async fn rename_dialogue(&self, id: &str, title: &str) -> AppResult<Dialogue> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::validation("Title must not be empty."));
        }
        let mut dialogues = self.dialogues().await;
        let dialogue = dialogues
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Dialogue {}", id)))?;
        dialogue.title = title.to_string();
        let renamed = dialogue.clone();
        self.save_dialogues(&dialogues).await?;
        info!("Renamed dialogue {} to '{}'", id, title);
        Ok(renamed)
    }

    pub async fn delete_dialogue(&self, id: &str) -> AppResult<()> {
        let mut dialogues = self.dialogues().await;
        let before = dialogues.len();
        dialogues.retain(|d| d.id != id);
        if dialogues.len() == before {
            return Err(AppError::NotFound(format!("Dialogue {}", id)));
        }
        self.save_dialogues(&dialogues).await?;
        info!("Deleted dialogue {}", id);
        Ok(())
    }

    async fn write<T: serde::Serialize + ?Sized>(&self, key: &str, value: &T) -> AppResult<()> {
        store::save(self.store.as_ref(), key, value)
            .await
            .map_err(AppError::Storage)
    }
}
