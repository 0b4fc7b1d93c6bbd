use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::services::llm::LlmConfig;
use crate::services::tts::TtsConfig;

pub const CONFIG_ENV: &str = "VOCAB2DIALOGUE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlaybackConfig {
    #[serde(default = "default_line_gap_ms")]
    pub line_gap_ms: u64,
    #[serde(default = "default_rate")]
    pub rate: f32,
    /// Player invocation; `{file}` and `{rate}` are substituted. An empty list
    /// disables audible output.
    #[serde(default = "default_player_command")]
    pub player_command: Vec<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            line_gap_ms: default_line_gap_ms(),
            rate: default_rate(),
            player_command: default_player_command(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_batch_size() -> usize {
    2
}
fn default_batch_delay_ms() -> u64 {
    1000
}
fn default_line_gap_ms() -> u64 {
    500
}
fn default_rate() -> f32 {
    1.0
}
fn default_player_command() -> Vec<String> {
    ["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet", "-af", "atempo={rate}", "{file}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_store_path() -> String {
    "data/store.json".to_string()
}
fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Config {
    /// Resolves the config path: explicit argument, then `VOCAB2DIALOGUE_CONFIG`,
    /// then `config.yml`.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(explicit);
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            Self::from_yaml(&content).with_context(|| format!("Failed to parse {:?}", path))?
        } else {
            warn!("{:?} not found, using default settings", path);
            Config::default()
        };
        config.apply_env_overrides();
        info!(
            "Using LLM provider '{}' and TTS provider '{}'",
            config.llm.provider, config.tts.provider
        );
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Credentials may come from the environment instead of the file.
    pub fn apply_env_overrides(&mut self) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = non_empty_env("DEEPSEEK_API_KEY");
        }
        if self.tts.token.is_empty() {
            if let Some(token) = non_empty_env("VOLC_TTS_TOKEN") {
                self.tts.token = token;
            }
        }
        if self.tts.appid.is_empty() {
            if let Some(appid) = non_empty_env("VOLC_TTS_APPID") {
                self.tts.appid = appid;
            }
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = Path::new(&self.storage.path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() -> Result<()> {
        let config = Config::from_yaml("{}")?;
        assert_eq!(config.batch.batch_size, 2);
        assert_eq!(config.batch.batch_delay_ms, 1000);
        assert_eq!(config.playback.line_gap_ms, 500);
        assert_eq!(config.playback.rate, 1.0);
        assert_eq!(config.llm.provider, "deepseek");
        assert_eq!(config.llm.model, "deepseek-chat");
        assert_eq!(config.tts.provider, "volcengine");
        assert_eq!(config.storage.path, "data/store.json");
        Ok(())
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() -> Result<()> {
        let yaml = r#"
batch:
  batch_size: 4
llm:
  provider: ollama
  model: qwen2.5
playback:
  player_command: []
"#;
        let config = Config::from_yaml(yaml)?;
        assert_eq!(config.batch.batch_size, 4);
        assert_eq!(config.batch.batch_delay_ms, 1000);
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.temperature, 0.7);
        assert!(config.playback.player_command.is_empty());
        Ok(())
    }

    #[test]
    fn test_save_and_reload() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("config.yml");
        let mut config = Config::default();
        config.server.bind = "0.0.0.0:8080".to_string();
        config.save(&path)?;

        let loaded = Config::load(Some(&path))?;
        assert_eq!(loaded.server.bind, "0.0.0.0:8080");
        Ok(())
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = Config::load(Some(&temp_dir.path().join("absent.yml")))?;
        assert_eq!(config.server.bind, "127.0.0.1:3000");
        Ok(())
    }
}
