use anyhow::{anyhow, Result};
use inquire::{Password, PasswordDisplayMode, Select};

use crate::core::catalog;
use crate::core::state::{Speaker, VoiceConfig, VoiceOption};
use crate::services::workflow::DialogueWorkflow;

/// Asks for the API key when none is saved or configured.
pub async fn ensure_api_key(workflow: &DialogueWorkflow) -> Result<()> {
    if workflow.has_api_key().await {
        return Ok(());
    }
    println!("No API key found. Dialogue generation needs a DeepSeek API key.");
    prompt_api_key(workflow).await
}

pub async fn prompt_api_key(workflow: &DialogueWorkflow) -> Result<()> {
    let key = Password::new("API key:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .with_help_message("Leave empty to clear the saved key")
        .prompt()?;
    workflow.set_api_key(&key).await?;
    if key.trim().is_empty() {
        println!("API key cleared.");
    } else {
        println!("API key saved.");
    }
    Ok(())
}

/// Lets the user pick a voice for both speakers, starting from `current`.
pub fn select_voices(current: &VoiceConfig) -> Result<VoiceConfig> {
    let mut selected = current.clone();
    for speaker in [Speaker::A, Speaker::B] {
        let prompt = format!("Select voice for speaker {}:", speaker);
        let voice = select_voice(&prompt, selected.voice_for(speaker))?;
        selected.set_voice(speaker, voice);
    }
    Ok(selected)
}

fn select_voice(prompt: &str, current: &VoiceOption) -> Result<VoiceOption> {
    let voices = catalog::voice_options();
    let options: Vec<String> = voices.iter().map(format_voice).collect();
    let start = voices.iter().position(|v| v.id == current.id).unwrap_or(0);

    let selection = Select::new(prompt, options)
        .with_starting_cursor(start)
        .prompt()?;

    let id = selection
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow!("Empty selection"))?;
    catalog::find_voice(id).ok_or_else(|| anyhow!("Unknown voice: {}", id))
}

pub fn format_voice(voice: &VoiceOption) -> String {
    format!("{} ({}) - {}", voice.id, voice.gender, voice.name)
}

pub fn select_rate(current: f32) -> Result<f32> {
    let options: Vec<String> = catalog::PLAYBACK_RATES.iter().map(|r| format!("{}x", r)).collect();
    let start = catalog::PLAYBACK_RATES
        .iter()
        .position(|r| (*r - current).abs() < f32::EPSILON)
        .unwrap_or(2);
    let selection = Select::new("Playback speed:", options)
        .with_starting_cursor(start)
        .prompt()?;
    selection
        .trim_end_matches('x')
        .parse()
        .map_err(|e| anyhow!("Invalid rate {}: {}", selection, e))
}
