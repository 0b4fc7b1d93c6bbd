use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::error::AppResult;
use crate::utils::audio;

pub mod volcengine;

#[async_trait]
pub trait TtsClient: Send + Sync {
    /// Raw audio for `text` spoken by the provider voice `voice_id`.
    async fn synthesize(&self, text: &str, voice_id: &str) -> AppResult<Vec<u8>>;

    fn mime_type(&self) -> &str {
        "audio/mpeg"
    }
}

/// Synthesizes `text` and wraps the audio in a `data:` URI.
pub async fn synthesize_data_uri(
    client: &dyn TtsClient,
    text: &str,
    voice_id: &str,
) -> AppResult<String> {
    let bytes = client.synthesize(text, voice_id).await?;
    Ok(audio::encode_data_uri(client.mime_type(), &bytes))
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TtsConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub appid: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_cluster")]
    pub cluster: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_speed_ratio")]
    pub speed_ratio: f32,
    #[serde(default = "default_uid")]
    pub uid: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            appid: String::new(),
            token: String::new(),
            cluster: default_cluster(),
            encoding: default_encoding(),
            speed_ratio: default_speed_ratio(),
            uid: default_uid(),
        }
    }
}

fn default_provider() -> String {
    "volcengine".to_string()
}
fn default_base_url() -> String {
    "https://openspeech.bytedance.com".to_string()
}
fn default_cluster() -> String {
    "volcano_tts".to_string()
}
fn default_encoding() -> String {
    "mp3".to_string()
}
fn default_speed_ratio() -> f32 {
    1.0
}
fn default_uid() -> String {
    "vocab2dialogue".to_string()
}

pub fn create_tts_client(config: &TtsConfig) -> Result<Arc<dyn TtsClient>> {
    info!("Initializing TTS Client for provider: {}", config.provider);
    url::Url::parse(&config.base_url)
        .with_context(|| format!("Invalid TTS base_url: {}", config.base_url))?;
    match config.provider.as_str() {
        "volcengine" => Ok(Arc::new(volcengine::VolcengineClient::new(config.clone()))),
        _ => Err(anyhow!("Unknown TTS provider: {}", config.provider)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AppError;

    struct FixedTts;

    #[async_trait]
    impl TtsClient for FixedTts {
        async fn synthesize(&self, text: &str, _voice_id: &str) -> AppResult<Vec<u8>> {
            if text.is_empty() {
                return Err(AppError::validation("empty text"));
            }
            Ok(vec![1, 2, 3])
        }
    }

    #[tokio::test]
    async fn test_synthesize_data_uri() {
        let uri = synthesize_data_uri(&FixedTts, "Hello", "BV511_streaming").await.unwrap();
        assert_eq!(uri, "data:audio/mpeg;base64,AQID");
        assert!(synthesize_data_uri(&FixedTts, "", "BV511_streaming").await.is_err());
    }

    #[test]
    fn test_create_tts_client() {
        assert!(create_tts_client(&TtsConfig::default()).is_ok());
        let other = TtsConfig { provider: "edge-tts".to_string(), ..TtsConfig::default() };
        assert!(create_tts_client(&other).is_err());
    }
}
