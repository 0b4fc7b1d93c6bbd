use chrono::{SecondsFormat, Utc};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::catalog;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 9;

/// Fresh 9 character base-36 identifier.
pub fn generate_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LEN)
        .map(|_| *ID_ALPHABET.choose(&mut rng).unwrap_or(&b'0') as char)
        .collect()
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    A,
    B,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::A => "A",
            Speaker::B => "B",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueLine {
    pub id: String,
    pub speaker: Speaker,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub is_loading_audio: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_title: bool,
}

impl DialogueLine {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            speaker,
            text: text.into(),
            audio_url: None,
            is_loading_audio: false,
            is_title: false,
        }
    }

    pub fn is_playable(&self) -> bool {
        !self.is_title && self.audio_url.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn needs_audio(&self, force_regenerate: bool) -> bool {
        !self.is_title && (force_regenerate || self.audio_url.is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dialogue {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub lines: Vec<DialogueLine>,
    #[serde(default)]
    pub words_used: Vec<String>,
    #[serde(default)]
    pub created_at: String,
}

impl Dialogue {
    pub fn new(title: impl Into<String>, lines: Vec<DialogueLine>, words_used: Vec<String>) -> Self {
        Self {
            id: generate_id(),
            title: title.into(),
            lines,
            words_used,
            created_at: now_timestamp(),
        }
    }

    pub fn line(&self, id: &str) -> Option<&DialogueLine> {
        self.lines.iter().find(|l| l.id == id)
    }

    pub fn playable_lines(&self) -> Vec<&DialogueLine> {
        self.lines.iter().filter(|l| l.is_playable()).collect()
    }

    pub fn is_all_audio_loaded(&self) -> bool {
        self.lines
            .iter()
            .filter(|l| !l.is_title)
            .all(|l| l.audio_url.is_some())
    }

    /// Drops generated audio so the next fill-in regenerates every line.
    pub fn clear_audio(&mut self) {
        for line in &mut self.lines {
            line.audio_url = None;
            line.is_loading_audio = false;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => f.write_str("male"),
            Gender::Female => f.write_str("female"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceOption {
    pub id: String,
    pub name: String,
    pub gender: Gender,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(rename = "A")]
    pub a: VoiceOption,
    #[serde(rename = "B")]
    pub b: VoiceOption,
}

impl VoiceConfig {
    pub fn voice_for(&self, speaker: Speaker) -> &VoiceOption {
        match speaker {
            Speaker::A => &self.a,
            Speaker::B => &self.b,
        }
    }

    pub fn set_voice(&mut self, speaker: Speaker, voice: VoiceOption) {
        match speaker {
            Speaker::A => self.a = voice,
            Speaker::B => self.b = voice,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        catalog::default_voice_config()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Playing,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub is_playing: bool,
    pub current_line_id: Option<String>,
    pub rate: f32,
    pub progress: f32,
    pub phase: PlaybackPhase,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_line_id: None,
            rate: 1.0,
            progress: 0.0,
            phase: PlaybackPhase::Idle,
        }
    }
}
