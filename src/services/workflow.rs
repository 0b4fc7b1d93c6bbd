use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::config::Config;
use crate::core::error::{AppError, AppResult};
use crate::core::repository::Repository;
use crate::core::state::{Dialogue, VoiceConfig};
use crate::services::audio::{AudioOrchestrator, AudioReport, BatchPolicy};
use crate::services::dialogue::{DialogueGenerator, GenerationOutcome};
use crate::services::llm::{self, LlmClient};
use crate::services::player::Player;
use crate::services::tts::TtsClient;
use crate::services::words;
use crate::utils::audio;

/// The user-facing operations, each one reading and writing the repository.
pub struct DialogueWorkflow {
    config: Config,
    repo: Repository,
    tts: Arc<dyn TtsClient>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl DialogueWorkflow {
    pub fn new(config: Config, repo: Repository, tts: Arc<dyn TtsClient>) -> Self {
        Self {
            config,
            repo,
            tts,
            llm: None,
        }
    }

    /// Uses `llm` instead of building a client from the saved API key.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // --- Credentials ---

    /// Saved key first, then the configured fallback.
    pub async fn api_key(&self) -> Option<String> {
        match self.repo.api_key().await {
            Some(key) => Some(key),
            None => self.config.llm.api_key.clone().filter(|k| !k.trim().is_empty()),
        }
    }

    pub async fn has_api_key(&self) -> bool {
        self.api_key().await.is_some()
    }

    pub async fn set_api_key(&self, key: &str) -> AppResult<()> {
        self.repo.set_api_key(key).await?;
        info!("API key {}", if key.trim().is_empty() { "cleared" } else { "saved" });
        Ok(())
    }

    async fn llm_client(&self) -> AppResult<Arc<dyn LlmClient>> {
        if let Some(llm) = &self.llm {
            return Ok(llm.clone());
        }
        let key = self.api_key().await;
        if key.is_none() && llm::requires_api_key(&self.config.llm) {
            return Err(AppError::MissingCredential);
        }
        llm::create_llm(&self.config.llm, key.as_deref().unwrap_or_default())
            .map_err(|e| AppError::Configuration(e.to_string()))
    }

    // --- Dialogues ---

    pub async fn dialogues(&self) -> Vec<Dialogue> {
        self.repo.dialogues().await
    }

    pub async fn dialogue(&self, id: &str) -> AppResult<Dialogue> {
        self.repo.find_dialogue(id).await
    }

    /// Normalizes `raw`, generates dialogues and stores them newest first.
    /// History is only written after a successful generation.
    pub async fn generate_from_input(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> AppResult<GenerationOutcome> {
        let words = words::normalize_words(raw);
        words::ensure_enough_words(&words)?;
        let llm = self.llm_client().await?;

        let outcome = DialogueGenerator::new(llm).generate(&words, cancel).await?;
        self.repo.prepend_dialogues(&outcome.dialogues).await?;
        info!("Saved {} new dialogue(s)", outcome.dialogues.len());
        Ok(outcome)
    }

    pub async fn rename(&self, id: &str, title: &str) -> AppResult<Dialogue> {
        self.repo.rename_dialogue(id, title).await
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.repo.delete_dialogue(id).await
    }

    // --- Audio ---

    pub fn orchestrator(&self) -> AudioOrchestrator {
        AudioOrchestrator::new(self.tts.clone(), BatchPolicy::from(&self.config.batch))
    }

    /// Generates missing audio (or all audio with `force`) for one dialogue
    /// using the saved voices, then merges the result into the stored list.
    pub async fn fill_audio<F>(
        &self,
        id: &str,
        force: bool,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> AppResult<AudioReport>
    where
        F: FnMut(usize, usize) + Send,
    {
        let dialogue = self.repo.find_dialogue(id).await?;
        let voices = self.repo.voice_config().await;
        let report = self
            .orchestrator()
            .generate(&dialogue, &voices, force, cancel, on_progress)
            .await;

        if report.requested > 0 && !self.repo.merge_dialogue(&report.dialogue).await? {
            warn!("Dialogue {} was deleted while its audio was generated", id);
        }
        Ok(report)
    }

    pub async fn voice_config(&self) -> VoiceConfig {
        self.repo.voice_config().await
    }

    /// Saves the voices. Audio of `dialogue_id`, if given, is dropped so it
    /// gets regenerated with the new voices.
    pub async fn apply_voices(
        &self,
        voices: &VoiceConfig,
        dialogue_id: Option<&str>,
    ) -> AppResult<Option<Dialogue>> {
        self.repo.set_voice_config(voices).await?;
        info!("Voices set to A={} B={}", voices.a.name, voices.b.name);

        let Some(id) = dialogue_id else {
            return Ok(None);
        };
        let mut dialogue = self.repo.find_dialogue(id).await?;
        dialogue.clear_audio();
        self.repo.merge_dialogue(&dialogue).await?;
        Ok(Some(dialogue))
    }

    /// Writes the audio of every line that has some into one file. Returns the
    /// number of lines written.
    pub async fn export_audio(&self, id: &str, path: &Path) -> AppResult<usize> {
        let dialogue = self.repo.find_dialogue(id).await?;
        let chunks: Vec<Vec<u8>> = dialogue
            .playable_lines()
            .into_iter()
            .filter_map(|line| {
                let url = line.audio_url.as_deref()?;
                match audio::decode_data_uri(url) {
                    Ok((_, bytes)) => Some(bytes),
                    Err(e) => {
                        warn!("Skipping line {} during export: {:#}", line.id, e);
                        None
                    }
                }
            })
            .collect();

        if chunks.is_empty() {
            return Err(AppError::validation(
                "This dialogue has no audio yet. Generate audio first.",
            ));
        }
        audio::write_merged(&chunks, path).map_err(AppError::Storage)?;
        info!("Exported {} line(s) of '{}' to {:?}", chunks.len(), dialogue.title, path);
        Ok(chunks.len())
    }

    pub fn player(&self) -> Player {
        Player::from_config(&self.config.playback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog;
    use crate::core::state::Speaker;
    use crate::core::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RESPONSE: &str = r#"[
        {"Dialogue title": "Morning", "Dialogue content": "A: Coffee?\nB: Yes, before the meeting.", "Words Used": ["coffee", "meeting"]},
        {"Dialogue title": "Evening", "Dialogue content": "A: Tea?\nB: No thanks.", "Words Used": ["tea"]}
    ]"#;

    #[derive(Debug, Default)]
    struct MockLlm {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for MockLlm {
        async fn chat(&self, _system: &str, _user: &str) -> AppResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::Upstream { status: 503, message: "busy".into() });
            }
            Ok(RESPONSE.to_string())
        }
    }

    #[derive(Default)]
    struct MockTts {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TtsClient for MockTts {
        async fn synthesize(&self, text: &str, _voice_id: &str) -> AppResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(text.as_bytes().to_vec())
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.batch.batch_delay_ms = 0;
        config.playback.player_command.clear();
        config
    }

    fn workflow(llm: Arc<MockLlm>, tts: Arc<MockTts>) -> DialogueWorkflow {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        DialogueWorkflow::new(test_config(), repo, tts).with_llm(llm)
    }

    #[tokio::test]
    async fn test_generate_stores_newest_first() -> AppResult<()> {
        let llm = Arc::new(MockLlm::default());
        let wf = workflow(llm.clone(), Arc::new(MockTts::default()));
        let cancel = CancellationToken::new();

        wf.generate_from_input("coffee, meeting", &cancel).await?;
        let outcome = wf.generate_from_input("coffee tea", &cancel).await?;
        assert_eq!(outcome.dialogues.len(), 2);

        let stored = wf.dialogues().await;
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[0].id, outcome.dialogues[0].id);
        assert_eq!(stored[1].id, outcome.dialogues[1].id);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_generation_keeps_history() -> AppResult<()> {
        let wf = workflow(Arc::new(MockLlm::default()), Arc::new(MockTts::default()));
        wf.generate_from_input("coffee meeting", &CancellationToken::new()).await?;
        let before = wf.dialogues().await;

        let failing = DialogueWorkflow::new(test_config(), wf.repository().clone(), Arc::new(MockTts::default()))
            .with_llm(Arc::new(MockLlm { fail: true, ..MockLlm::default() }));
        let result = failing.generate_from_input("coffee meeting", &CancellationToken::new()).await;
        assert!(matches!(result, Err(AppError::Upstream { status: 503, .. })));
        assert!(matches!(
            failing.generate_from_input("coffee", &CancellationToken::new()).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(wf.dialogues().await, before);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        let wf = DialogueWorkflow::new(test_config(), repo, Arc::new(MockTts::default()));
        assert!(!wf.has_api_key().await);
        assert!(matches!(
            wf.generate_from_input("coffee meeting", &CancellationToken::new()).await,
            Err(AppError::MissingCredential)
        ));

        wf.set_api_key("sk-saved").await.unwrap();
        assert_eq!(wf.api_key().await.as_deref(), Some("sk-saved"));
    }

    #[tokio::test]
    async fn test_fill_audio_persists_and_is_idempotent() -> AppResult<()> {
        let tts = Arc::new(MockTts::default());
        let wf = workflow(Arc::new(MockLlm::default()), tts.clone());
        let outcome = wf.generate_from_input("coffee meeting", &CancellationToken::new()).await?;
        let id = outcome.dialogues[0].id.clone();

        let mut updates = Vec::new();
        let report = wf
            .fill_audio(&id, false, &CancellationToken::new(), |done, total| updates.push((done, total)))
            .await?;
        assert_eq!(report.generated, 2);
        assert_eq!(updates.last(), Some(&(2, 2)));
        assert!(wf.dialogue(&id).await?.is_all_audio_loaded());
        assert!(!wf.dialogues().await[1].is_all_audio_loaded());

        let again = wf.fill_audio(&id, false, &CancellationToken::new(), |_, _| {}).await?;
        assert_eq!(again.requested, 0);
        assert_eq!(tts.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_voices_clears_audio() -> AppResult<()> {
        let wf = workflow(Arc::new(MockLlm::default()), Arc::new(MockTts::default()));
        let outcome = wf.generate_from_input("coffee meeting", &CancellationToken::new()).await?;
        let id = outcome.dialogues[0].id.clone();
        wf.fill_audio(&id, false, &CancellationToken::new(), |_, _| {}).await?;

        let mut voices = wf.voice_config().await;
        voices.set_voice(Speaker::A, catalog::find_voice("BV702_streaming").unwrap());
        let cleared = wf.apply_voices(&voices, Some(&id)).await?.unwrap();

        assert!(cleared.lines.iter().all(|l| l.audio_url.is_none()));
        assert!(wf.dialogue(&id).await?.lines.iter().all(|l| l.audio_url.is_none()));
        assert_eq!(wf.voice_config().await.a.id, "BV702_streaming");
        Ok(())
    }

    #[tokio::test]
    async fn test_export_concatenates_line_audio() -> AppResult<()> {
        let wf = workflow(Arc::new(MockLlm::default()), Arc::new(MockTts::default()));
        let outcome = wf.generate_from_input("coffee meeting", &CancellationToken::new()).await?;
        let id = outcome.dialogues[0].id.clone();

        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("morning.mp3");
        assert!(matches!(wf.export_audio(&id, &path).await, Err(AppError::Validation(_))));

        wf.fill_audio(&id, false, &CancellationToken::new(), |_, _| {}).await?;
        assert_eq!(wf.export_audio(&id, &path).await?, 2);
        assert_eq!(std::fs::read(&path).unwrap(), b"Coffee?Yes, before the meeting.");
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_and_delete() -> AppResult<()> {
        let wf = workflow(Arc::new(MockLlm::default()), Arc::new(MockTts::default()));
        let outcome = wf.generate_from_input("coffee meeting", &CancellationToken::new()).await?;
        let id = outcome.dialogues[0].id.clone();

        assert_eq!(wf.rename(&id, "Breakfast").await?.title, "Breakfast");
        wf.delete(&id).await?;
        assert!(matches!(wf.dialogue(&id).await, Err(AppError::NotFound(_))));
        assert_eq!(wf.dialogues().await.len(), 1);
        Ok(())
    }
}
