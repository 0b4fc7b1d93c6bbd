use futures_util::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::config::BatchConfig;
use crate::core::state::{Dialogue, VoiceConfig};
use crate::services::tts::{self, TtsClient};

/// How many TTS requests run together and how long to wait between groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl BatchPolicy {
    pub fn new(batch_size: usize, batch_delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1))
    }
}

impl From<&BatchConfig> for BatchPolicy {
    fn from(config: &BatchConfig) -> Self {
        Self::new(config.batch_size, Duration::from_millis(config.batch_delay_ms))
    }
}

#[derive(Debug, Clone)]
pub struct AudioReport {
    /// The dialogue with results merged in, lines in their original order.
    pub dialogue: Dialogue,
    pub requested: usize,
    pub generated: usize,
    /// Ids of lines that ended without audio.
    pub failed: Vec<String>,
    pub cancelled: bool,
}

struct Job {
    line_id: String,
    text: String,
    voice_id: String,
}

pub struct AudioOrchestrator {
    tts: Arc<dyn TtsClient>,
    policy: BatchPolicy,
}

impl AudioOrchestrator {
    pub fn new(tts: Arc<dyn TtsClient>, policy: BatchPolicy) -> Self {
        Self { tts, policy }
    }

    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    /// Fills in audio for every line that needs it. Requests within a batch run
    /// concurrently; batches run one after another with `batch_delay` between
    /// them. Individual failures never abort the run.
    pub async fn generate<F>(
        &self,
        dialogue: &Dialogue,
        voices: &VoiceConfig,
        force: bool,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> AudioReport
    where
        F: FnMut(usize, usize) + Send,
    {
        let jobs: Vec<Job> = dialogue
            .lines
            .iter()
            .filter(|line| line.needs_audio(force))
            .map(|line| Job {
                line_id: line.id.clone(),
                text: line.text.clone(),
                voice_id: voices.voice_for(line.speaker).id.clone(),
            })
            .collect();

        let total = jobs.len();
        if total == 0 {
            debug!("Dialogue {} already has audio for every line", dialogue.id);
            return AudioReport {
                dialogue: dialogue.clone(),
                requested: 0,
                generated: 0,
                failed: Vec::new(),
                cancelled: false,
            };
        }

        info!(
            "Generating audio for {} line(s) of '{}' in batches of {}",
            total, dialogue.title, self.policy.batch_size
        );

        let mut results: HashMap<String, Option<String>> = HashMap::with_capacity(total);
        let mut cancelled = false;
        let mut done = 0;

        for (index, batch) in jobs.chunks(self.policy.batch_size).enumerate() {
            if index > 0 && !self.policy.batch_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.policy.batch_delay) => {}
                }
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let mut requests: FuturesUnordered<_> = batch
                .iter()
                .map(|job| async move {
                    let outcome =
                        tts::synthesize_data_uri(self.tts.as_ref(), &job.text, &job.voice_id).await;
                    (job, outcome)
                })
                .collect();

            // Outcomes are recorded as they land; a cancel drops only the
            // requests still running.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    next = requests.next() => match next {
                        Some((job, Ok(url))) => {
                            results.insert(job.line_id.clone(), Some(url));
                        }
                        Some((job, Err(e))) => {
                            warn!("Audio generation failed for line {}: {}", job.line_id, e);
                            results.insert(job.line_id.clone(), None);
                        }
                        None => break,
                    },
                }
            }
            if cancelled {
                break;
            }
            done += batch.len();
            on_progress(done, total);
        }

        if cancelled {
            warn!("Audio generation cancelled after {}/{} line(s)", results.len(), total);
        }

        let requested_ids: HashSet<&str> = jobs.iter().map(|j| j.line_id.as_str()).collect();
        let mut merged = dialogue.clone();
        let mut failed = Vec::new();
        let mut generated = 0;
        for line in merged.lines.iter_mut() {
            line.is_loading_audio = false;
            if !requested_ids.contains(line.id.as_str()) {
                continue;
            }
            match results.remove(&line.id) {
                Some(Some(url)) => {
                    line.audio_url = Some(url);
                    generated += 1;
                }
                Some(None) => line.audio_url = None,
                // Unfinished because of cancellation: keep whatever was there.
                None => {}
            }
            if line.audio_url.is_none() {
                failed.push(line.id.clone());
            }
        }

        info!(
            "Audio for '{}': {} generated, {} without audio",
            merged.title,
            generated,
            failed.len()
        );

        AudioReport {
            dialogue: merged,
            requested: total,
            generated,
            failed,
            cancelled,
        }
    }
}
