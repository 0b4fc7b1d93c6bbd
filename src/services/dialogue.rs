use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::error::{AppError, AppResult};
use crate::core::state::Dialogue;
use crate::services::llm::LlmClient;
use crate::services::script;
use crate::services::words;

/// Dialogues produced for one word list.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub dialogues: Vec<Dialogue>,
    /// Input words the model did not report using. Informational only.
    pub missing_words: Vec<String>,
}

pub struct DialogueGenerator {
    llm: Arc<dyn LlmClient>,
}

impl DialogueGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn generate(
        &self,
        words: &[String],
        cancel: &CancellationToken,
    ) -> AppResult<GenerationOutcome> {
        words::ensure_enough_words(words)?;

        let prompt = script::build_dialogue_prompt(words);
        info!("Requesting dialogues for {} words", words.len());

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            response = self.llm.chat("", &prompt) => response?,
        };

        let dialogues = script::parse_dialogues(&response)?;
        let missing_words = script::missing_words(words, &dialogues);
        if !missing_words.is_empty() {
            warn!("Generated dialogues do not use: {}", missing_words.join(", "));
        }
        info!(
            "Generated {} dialogue(s) with {} lines",
            dialogues.len(),
            dialogues.iter().map(|d| d.lines.len()).sum::<usize>()
        );

        Ok(GenerationOutcome { dialogues, missing_words })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct MockLlm {
        response: String,
        prompts: Mutex<Vec<String>>,
    }

    impl MockLlm {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for MockLlm {
        async fn chat(&self, _system: &str, user: &str) -> AppResult<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            Ok(self.response.clone())
        }
    }

    #[derive(Debug)]
    struct PendingLlm;

    #[async_trait]
    impl LlmClient for PendingLlm {
        async fn chat(&self, _system: &str, _user: &str) -> AppResult<String> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    #[tokio::test]
    async fn test_generate_parses_response() {
        let llm = MockLlm::new(
            r#"Here you go:
[{"Dialogue title": "Cafe", "Dialogue content": "A: Coffee?\nB: Sure, after the meeting.", "Words Used": ["coffee", "meeting"]}]"#,
        );
        let generator = DialogueGenerator::new(llm.clone());
        let outcome = generator
            .generate(&words(&["coffee", "meeting"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.dialogues.len(), 1);
        assert_eq!(outcome.dialogues[0].title, "Cafe");
        assert_eq!(outcome.dialogues[0].lines.len(), 2);
        assert!(outcome.missing_words.is_empty());

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].ends_with("coffee, meeting"));
    }

    #[tokio::test]
    async fn test_too_few_words_makes_no_request() {
        let llm = MockLlm::new("[]");
        let generator = DialogueGenerator::new(llm.clone());
        let result = generator.generate(&words(&["coffee"]), &CancellationToken::new()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reports_missing_words() {
        let llm = MockLlm::new(
            r#"[{"Dialogue title": "Park", "Dialogue content": "A: Nice weather.\nB: Yes.", "Words Used": ["weather"]}]"#,
        );
        let outcome = DialogueGenerator::new(llm)
            .generate(&words(&["weather", "umbrella"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.missing_words, vec!["umbrella"]);
    }

    #[tokio::test]
    async fn test_prose_only_response_is_format_error() {
        let llm = MockLlm::new("Sorry, I cannot help with that.");
        let result = DialogueGenerator::new(llm)
            .generate(&words(&["a", "b"]), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AppError::ResponseFormat(_))));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = DialogueGenerator::new(Arc::new(PendingLlm))
            .generate(&words(&["a", "b"]), &cancel)
            .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
