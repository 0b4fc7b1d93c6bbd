use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::core::config::Config;
use crate::core::error::{AppError, AppResult};
use crate::core::state::Dialogue;
use crate::services::dialogue::DialogueGenerator;
use crate::services::llm::{self, LlmClient};
use crate::services::tts::{self, TtsClient};
use crate::services::words;

/// Builds an LLM client for the credential sent with a request.
pub type LlmFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn LlmClient>> + Send + Sync>;

#[derive(Clone)]
pub struct ServerState {
    llm_factory: LlmFactory,
    tts: Arc<dyn TtsClient>,
}

impl ServerState {
    pub fn new(config: &Config, tts: Arc<dyn TtsClient>) -> Self {
        let llm_config = config.llm.clone();
        Self {
            llm_factory: Arc::new(move |key: &str| llm::create_llm(&llm_config, key)),
            tts,
        }
    }

    pub fn with_llm_factory(mut self, factory: LlmFactory) -> Self {
        self.llm_factory = factory;
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.user_message() }))).into_response()
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/api/generateDialogue", post(generate_dialogue))
        .route("/api/generateAudio", post(generate_audio))
        .with_state(state)
}

pub async fn serve(config: &Config, tts: Arc<dyn TtsClient>, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(ServerState::new(config, tts)))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Server stopped");
    Ok(())
}

// --- Dialogue ---

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateDialogueResponse {
    pub dialogue: Dialogue,
    pub dialogues: Vec<Dialogue>,
}

fn parse_words(body: &[u8]) -> AppResult<Vec<String>> {
    let invalid = || AppError::validation("Please provide a list of words.");
    let value: Value = serde_json::from_slice(body).map_err(|_| invalid())?;
    let items = value.get("words").and_then(Value::as_array).ok_or_else(invalid)?;

    let mut list = Vec::with_capacity(items.len());
    for item in items {
        let word = item.as_str().map(str::trim).ok_or_else(invalid)?;
        if !word.is_empty() && !list.iter().any(|w: &String| w == word) {
            list.push(word.to_string());
        }
    }
    words::ensure_enough_words(&list)?;
    Ok(list)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn generate_dialogue(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<GenerateDialogueResponse>> {
    let words = parse_words(&body)?;
    let key = bearer_token(&headers).ok_or(AppError::MissingCredential)?;
    let llm = (state.llm_factory)(key).map_err(|e| AppError::Configuration(e.to_string()))?;

    let outcome = DialogueGenerator::new(llm)
        .generate(&words, &CancellationToken::new())
        .await?;
    let dialogue = outcome
        .dialogues
        .first()
        .cloned()
        .ok_or_else(|| AppError::ResponseFormat("model returned no dialogues".to_string()))?;

    Ok(Json(GenerateDialogueResponse {
        dialogue,
        dialogues: outcome.dialogues,
    }))
}

// --- Audio ---

#[derive(Debug, Deserialize)]
struct GenerateAudioRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    voice: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateAudioResponse {
    pub url: String,
}

async fn generate_audio(
    State(state): State<ServerState>,
    body: Bytes,
) -> AppResult<Json<GenerateAudioResponse>> {
    let missing = || AppError::validation("Text and voice are required.");
    let request: GenerateAudioRequest = serde_json::from_slice(&body).map_err(|_| missing())?;
    let text = request.text.filter(|t| !t.trim().is_empty()).ok_or_else(missing)?;
    let voice = request.voice.filter(|v| !v.trim().is_empty()).ok_or_else(missing)?;

    let url = tts::synthesize_data_uri(state.tts.as_ref(), &text, &voice).await?;
    Ok(Json(GenerateAudioResponse { url }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::SocketAddr;

    const RESPONSE: &str = r#"[{"Dialogue title": "Shop", "Dialogue content": "A: Apples?\nB: And bread.", "Words Used": ["apple", "bread"]},
        {"Dialogue title": "Park", "Dialogue content": "A: Nice day.", "Words Used": []}]"#;

    #[derive(Debug)]
    struct MockLlm {
        result: AppResult<String>,
    }

    #[async_trait]
    impl LlmClient for MockLlm {
        async fn chat(&self, _system: &str, _user: &str) -> AppResult<String> {
            match &self.result {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(AppError::Upstream { status: 502, message: "down".into() }),
            }
        }
    }

    struct MockTts {
        configured: bool,
    }

    #[async_trait]
    impl TtsClient for MockTts {
        async fn synthesize(&self, _text: &str, _voice_id: &str) -> AppResult<Vec<u8>> {
            if !self.configured {
                return Err(AppError::Configuration("missing token".into()));
            }
            Ok(vec![0xff, 0xfb])
        }
    }

    async fn start(llm_result: AppResult<String>, tts_configured: bool) -> SocketAddr {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlm { result: llm_result });
        let state = ServerState::new(&Config::default(), Arc::new(MockTts { configured: tts_configured }))
            .with_llm_factory(Arc::new(move |_key: &str| Ok(llm.clone())));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    async fn post(addr: SocketAddr, path: &str, key: Option<&str>, body: &str) -> (u16, Value) {
        let mut request = reqwest::Client::new()
            .post(format!("http://{}{}", addr, path))
            .header("content-type", "application/json")
            .body(body.to_string());
        if let Some(key) = key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_generate_dialogue_success() {
        let addr = start(Ok(RESPONSE.to_string()), true).await;
        let (status, body) =
            post(addr, "/api/generateDialogue", Some("sk-1"), r#"{"words": ["apple", "bread"]}"#).await;
        assert_eq!(status, 200);
        assert_eq!(body["dialogue"]["title"], "Shop");
        assert_eq!(body["dialogues"].as_array().unwrap().len(), 2);
        assert_eq!(body["dialogue"]["lines"][1]["speaker"], "B");
        assert_eq!(body["dialogue"]["lines"][1]["isLoadingAudio"], false);
    }

    #[tokio::test]
    async fn test_generate_dialogue_input_errors() {
        let addr = start(Ok(RESPONSE.to_string()), true).await;

        let (status, body) = post(addr, "/api/generateDialogue", Some("sk"), r#"{"words": ["one"]}"#).await;
        assert_eq!(status, 400);
        assert!(body["error"].is_string());

        let (status, _) = post(addr, "/api/generateDialogue", Some("sk"), r#"{"words": "a b"}"#).await;
        assert_eq!(status, 400);

        let (status, _) = post(addr, "/api/generateDialogue", Some("sk"), "not json").await;
        assert_eq!(status, 400);

        let (status, body) = post(addr, "/api/generateDialogue", None, r#"{"words": ["a", "b"]}"#).await;
        assert_eq!(status, 401);
        assert!(body["error"].as_str().unwrap().contains("API key"));
    }

    #[tokio::test]
    async fn test_generate_dialogue_upstream_failures() {
        let addr = start(Err(AppError::Cancelled), true).await;
        let (status, _) = post(addr, "/api/generateDialogue", Some("sk"), r#"{"words": ["a", "b"]}"#).await;
        assert_eq!(status, 500);

        let addr = start(Ok("no json here".to_string()), true).await;
        let (status, body) = post(addr, "/api/generateDialogue", Some("sk"), r#"{"words": ["a", "b"]}"#).await;
        assert_eq!(status, 500);
        assert!(body["error"].as_str().unwrap().contains("format"));
    }

    #[tokio::test]
    async fn test_generate_audio() {
        let addr = start(Ok(RESPONSE.to_string()), true).await;
        let (status, body) =
            post(addr, "/api/generateAudio", None, r#"{"text": "Hello", "voice": "BV511_streaming"}"#).await;
        assert_eq!(status, 200);
        assert_eq!(body["url"], "data:audio/mpeg;base64,//s=");

        let (status, _) = post(addr, "/api/generateAudio", None, r#"{"text": "Hello"}"#).await;
        assert_eq!(status, 400);

        let unconfigured = start(Ok(RESPONSE.to_string()), false).await;
        let (status, body) =
            post(unconfigured, "/api/generateAudio", None, r#"{"text": "Hi", "voice": "BV511_streaming"}"#).await;
        assert_eq!(status, 500);
        assert!(body["error"].is_string());
    }

    #[test]
    fn test_parse_words_dedups_and_trims() {
        let words = parse_words(br#"{"words": [" apple ", "apple", "", "bread"]}"#).unwrap();
        assert_eq!(words, vec!["apple", "bread"]);
    }
}
