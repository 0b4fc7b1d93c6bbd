use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::debug;
use serde::{Deserialize, Serialize};

use super::{TtsClient, TtsConfig};
use crate::core::error::{AppError, AppResult};
use crate::core::state::generate_id;

const SUCCESS_CODE: i64 = 3000;

/// Volcengine OpenSpeech v1 HTTP synthesis.
pub struct VolcengineClient {
    config: TtsConfig,
    client: reqwest::Client,
}

impl VolcengineClient {
    pub fn new(config: TtsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v1/tts", self.config.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    app: AppSection<'a>,
    user: UserSection<'a>,
    audio: AudioSection<'a>,
    request: RequestSection<'a>,
}

#[derive(Serialize)]
struct AppSection<'a> {
    appid: &'a str,
    token: &'a str,
    cluster: &'a str,
}

#[derive(Serialize)]
struct UserSection<'a> {
    uid: &'a str,
}

#[derive(Serialize)]
struct AudioSection<'a> {
    voice_type: &'a str,
    encoding: &'a str,
    speed_ratio: f32,
}

#[derive(Serialize)]
struct RequestSection<'a> {
    reqid: String,
    text: &'a str,
    text_type: &'a str,
    operation: &'a str,
}

#[derive(Deserialize)]
struct TtsResponse {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<String>,
}

#[async_trait]
impl TtsClient for VolcengineClient {
    async fn synthesize(&self, text: &str, voice_id: &str) -> AppResult<Vec<u8>> {
        if self.config.appid.is_empty() || self.config.token.is_empty() {
            return Err(AppError::Configuration(
                "Volcengine appid and token must be set".to_string(),
            ));
        }
        if text.trim().is_empty() || voice_id.trim().is_empty() {
            return Err(AppError::validation("Text and voice are required."));
        }

        let body = TtsRequest {
            app: AppSection {
                appid: &self.config.appid,
                token: &self.config.token,
                cluster: &self.config.cluster,
            },
            user: UserSection { uid: &self.config.uid },
            audio: AudioSection {
                voice_type: voice_id,
                encoding: &self.config.encoding,
                speed_ratio: self.config.speed_ratio,
            },
            request: RequestSection {
                reqid: generate_id(),
                text,
                text_type: "plain",
                operation: "query",
            },
        };
        debug!("Synthesizing {} chars with {}", text.chars().count(), voice_id);

        let resp = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer;{}", self.config.token))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let raw = resp.text().await?;
        let parsed: TtsResponse = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(_) => {
                return Err(AppError::Upstream { status, message: raw });
            }
        };
        if parsed.code != SUCCESS_CODE {
            return Err(AppError::Upstream {
                status,
                message: format!("code {}: {}", parsed.code, parsed.message),
            });
        }

        let data = parsed
            .data
            .filter(|d| !d.is_empty())
            .ok_or_else(|| AppError::ResponseFormat("TTS response has no audio".to_string()))?;
        STANDARD
            .decode(data)
            .map_err(|e| AppError::ResponseFormat(format!("invalid audio payload: {}", e)))
    }

    fn mime_type(&self) -> &str {
        match self.config.encoding.as_str() {
            "wav" => "audio/wav",
            "ogg_opus" => "audio/ogg",
            "pcm" => "audio/pcm",
            _ => "audio/mpeg",
        }
    }
}
