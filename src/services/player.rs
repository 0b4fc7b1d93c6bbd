use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::io::Write;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::config::PlaybackConfig;
use crate::core::state::{Dialogue, DialogueLine, PlaybackPhase, PlayerState};
use crate::utils::audio;

pub const MIN_RATE: f32 = 0.5;
pub const MAX_RATE: f32 = 2.0;

/// Something that can play one audio reference at a time.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Starts playing `url` and returns a handle to the running audio.
    async fn open(&self, url: &str, rate: f32) -> Result<Arc<dyn ActiveAudio>>;
}

#[async_trait]
pub trait ActiveAudio: Send + Sync {
    /// Resolves when playback ends, fails, or is stopped.
    async fn finished(&self) -> Result<()>;
    fn set_rate(&self, rate: f32);
    fn stop(&self);
}

pub fn output_from_config(config: &PlaybackConfig) -> Arc<dyn AudioOutput> {
    if config.player_command.is_empty() {
        Arc::new(SilentOutput)
    } else {
        Arc::new(ExternalPlayer::new(config.player_command.clone()))
    }
}

struct Session {
    token: CancellationToken,
    active: Option<Arc<dyn ActiveAudio>>,
}

struct PlayerInner {
    output: Arc<dyn AudioOutput>,
    line_gap: Duration,
    state: watch::Sender<PlayerState>,
    session: Mutex<Option<Session>>,
}

impl PlayerInner {
    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Plays the audio of a dialogue line after line. Cloning shares the player.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    pub fn new(output: Arc<dyn AudioOutput>, line_gap: Duration, rate: f32) -> Self {
        let initial = PlayerState {
            rate: clamp_rate(rate),
            ..PlayerState::default()
        };
        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(PlayerInner {
                output,
                line_gap,
                state,
                session: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(
            output_from_config(config),
            Duration::from_millis(config.line_gap_ms),
            config.rate,
        )
    }

    pub fn state(&self) -> PlayerState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.inner.state.subscribe()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.state.borrow().is_playing
    }

    /// Starts the sequence from the first playable line. Returns `false` when
    /// already playing or when no line has audio yet.
    pub fn play(&self, dialogue: &Dialogue) -> bool {
        let lines: Vec<(String, String)> = dialogue
            .playable_lines()
            .into_iter()
            .filter_map(|l| l.audio_url.clone().map(|url| (l.id.clone(), url)))
            .collect();

        let mut session = self.inner.session();
        if self.inner.state.borrow().is_playing || lines.is_empty() {
            return false;
        }

        let token = CancellationToken::new();
        *session = Some(Session { token: token.clone(), active: None });
        self.inner.state.send_modify(|s| {
            s.is_playing = true;
            s.phase = PlaybackPhase::Playing;
            s.progress = 0.0;
        });
        drop(session);

        info!("Playing '{}' ({} lines)", dialogue.title, lines.len());
        tokio::spawn(run_sequence(self.inner.clone(), token, lines));
        true
    }

    /// Stops the active audio immediately. Only meaningful while playing.
    pub fn pause(&self) -> bool {
        let mut session = self.inner.session();
        if !self.inner.state.borrow().is_playing {
            return false;
        }
        if let Some(current) = session.take() {
            current.token.cancel();
            if let Some(active) = current.active {
                active.stop();
            }
        }
        self.inner.state.send_modify(|s| {
            s.is_playing = false;
            s.current_line_id = None;
            s.phase = PlaybackPhase::Idle;
        });
        debug!("Playback paused");
        true
    }

    /// Accepted in any state; forwarded to the active audio if there is one.
    pub fn set_rate(&self, rate: f32) -> f32 {
        let rate = clamp_rate(rate);
        let session = self.inner.session();
        self.inner.state.send_modify(|s| s.rate = rate);
        if let Some(active) = session.as_ref().and_then(|s| s.active.as_ref()) {
            active.set_rate(rate);
        }
        rate
    }

    /// Plays one line outside of the sequence. Player state is not touched.
    pub async fn play_single(&self, line: &DialogueLine) -> Result<()> {
        let url = line
            .audio_url
            .as_deref()
            .filter(|_| line.is_playable())
            .ok_or_else(|| anyhow!("Line {} has no audio", line.id))?;
        let rate = self.inner.state.borrow().rate;
        let audio = self.inner.output.open(url, rate).await?;
        audio.finished().await
    }

    /// Resolves once the sequence has completed or been paused.
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| !s.is_playing).await;
    }
}

pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_nan() {
        return 1.0;
    }
    rate.clamp(MIN_RATE, MAX_RATE)
}

async fn run_sequence(inner: Arc<PlayerInner>, token: CancellationToken, lines: Vec<(String, String)>) {
    let total = lines.len();
    for (index, (line_id, url)) in lines.iter().enumerate() {
        let rate = {
            let _session = inner.session();
            if token.is_cancelled() {
                return;
            }
            inner.state.send_modify(|s| {
                s.current_line_id = Some(line_id.clone());
                s.progress = index as f32 / total as f32 * 100.0;
            });
            let rate = inner.state.borrow().rate;
            rate
        };

        match inner.output.open(url, rate).await {
            Ok(active) => {
                {
                    let mut session = inner.session();
                    match session.as_mut() {
                        Some(current) if !token.is_cancelled() => {
                            current.active = Some(active.clone());
                        }
                        _ => {
                            active.stop();
                            return;
                        }
                    }
                }
                tokio::select! {
                    _ = token.cancelled() => {
                        active.stop();
                        return;
                    }
                    result = active.finished() => {
                        if let Err(e) = result {
                            warn!("Playback of line {} failed: {:#}", line_id, e);
                        }
                    }
                }
                if let Some(current) = inner.session().as_mut() {
                    if !token.is_cancelled() {
                        current.active = None;
                    }
                }
            }
            Err(e) => warn!("Could not play line {}: {:#}", line_id, e),
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(inner.line_gap) => {}
        }
    }

    let mut session = inner.session();
    if token.is_cancelled() {
        return;
    }
    *session = None;
    inner.state.send_modify(|s| {
        s.is_playing = false;
        s.current_line_id = None;
        s.progress = 100.0;
        s.phase = PlaybackPhase::Completed;
    });
    info!("Playback completed");
}

/// Decodes a `data:` URI or downloads an http(s) URL. Returns the mime type
/// and the audio bytes.
pub async fn load_audio(url: &str) -> Result<(String, Vec<u8>)> {
    if url.starts_with("data:") {
        return audio::decode_data_uri(url);
    }
    let parsed = url::Url::parse(url)
        .with_context(|| format!("Unsupported audio reference: {}", url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow!("Unsupported audio scheme: {}", parsed.scheme()));
    }

    debug!("Downloading audio from {}", parsed);
    let resp = reqwest::get(parsed).await?.error_for_status()?;
    let mime = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "audio/mpeg".to_string());
    let bytes = resp.bytes().await?;
    Ok((mime, bytes.to_vec()))
}

// --- Silent Output ---

/// Waits for the estimated length of each clip without producing sound.
pub struct SilentOutput;

struct SilentAudio {
    clock: Mutex<SilentClock>,
    rate_changed: Notify,
    token: CancellationToken,
}

struct SilentClock {
    deadline: Instant,
    rate: f32,
}

impl SilentAudio {
    fn clock(&self) -> MutexGuard<'_, SilentClock> {
        self.clock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AudioOutput for SilentOutput {
    async fn open(&self, url: &str, rate: f32) -> Result<Arc<dyn ActiveAudio>> {
        let (_, bytes) = load_audio(url).await?;
        let rate = clamp_rate(rate);
        Ok(Arc::new(SilentAudio {
            clock: Mutex::new(SilentClock {
                deadline: Instant::now() + audio::estimate_duration(bytes.len(), rate),
                rate,
            }),
            rate_changed: Notify::new(),
            token: CancellationToken::new(),
        }))
    }
}

#[async_trait]
impl ActiveAudio for SilentAudio {
    async fn finished(&self) -> Result<()> {
        loop {
            let deadline = self.clock().deadline;
            tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                _ = self.rate_changed.notified() => {}
            }
        }
    }

    /// Stretches or shrinks whatever is left of the clip.
    fn set_rate(&self, rate: f32) {
        let rate = clamp_rate(rate);
        {
            let mut clock = self.clock();
            let now = Instant::now();
            let remaining = clock.deadline.saturating_duration_since(now);
            clock.deadline = now + remaining.mul_f32(clock.rate / rate);
            clock.rate = rate;
        }
        self.rate_changed.notify_one();
    }

    fn stop(&self) {
        self.token.cancel();
    }
}

// --- External Player ---

/// Runs a command line player per clip. `{file}` and `{rate}` in the
/// arguments are substituted; rate changes apply from the next clip.
pub struct ExternalPlayer {
    command: Vec<String>,
}

impl ExternalPlayer {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn args_for(&self, file: &str, rate: f32) -> Vec<String> {
        let rate = format!("{:.2}", rate);
        self.command
            .iter()
            .map(|arg| arg.replace("{file}", file).replace("{rate}", &rate))
            .collect()
    }
}

struct ExternalAudio {
    child: tokio::sync::Mutex<tokio::process::Child>,
    token: CancellationToken,
    _file: NamedTempFile,
}

#[async_trait]
impl AudioOutput for ExternalPlayer {
    async fn open(&self, url: &str, rate: f32) -> Result<Arc<dyn ActiveAudio>> {
        let (mime, bytes) = load_audio(url).await?;
        let mut file = tempfile::Builder::new()
            .prefix("vocab2dialogue-")
            .suffix(&format!(".{}", audio::extension_for(&mime)))
            .tempfile()
            .context("Failed to create temp audio file")?;
        file.write_all(&bytes)?;
        file.flush()?;

        let file_path = file.path().to_string_lossy().to_string();
        let args = self.args_for(&file_path, rate);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow!("Player command is empty"))?;
        debug!("Running {} {:?}", program, rest);

        let child = tokio::process::Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start player '{}'", program))?;

        Ok(Arc::new(ExternalAudio {
            child: tokio::sync::Mutex::new(child),
            token: CancellationToken::new(),
            _file: file,
        }))
    }
}

#[async_trait]
impl ActiveAudio for ExternalAudio {
    async fn finished(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        let status = tokio::select! {
            _ = self.token.cancelled() => None,
            status = child.wait() => Some(status?),
        };
        match status {
            None => {
                let _ = child.kill().await;
                Ok(())
            }
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(anyhow!("Player exited with {}", status)),
        }
    }

    /// The running process keeps its rate; the next clip starts with the new one.
    fn set_rate(&self, _rate: f32) {}

    fn stop(&self) {
        self.token.cancel();
    }
}
