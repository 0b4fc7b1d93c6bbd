use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, Select, Text};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use vocab2dialogue::core::catalog;
use vocab2dialogue::core::config::Config;
use vocab2dialogue::core::error::AppError;
use vocab2dialogue::core::repository::Repository;
use vocab2dialogue::core::state::{Dialogue, Speaker};
use vocab2dialogue::core::store::FileStore;
use vocab2dialogue::server;
use vocab2dialogue::services::setup;
use vocab2dialogue::services::tts::create_tts_client;
use vocab2dialogue::services::workflow::DialogueWorkflow;

#[derive(Parser)]
#[command(name = "vocab2dialogue", version, about = "Turn vocabulary lists into spoken practice dialogues")]
struct Cli {
    /// Path to config.yml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate dialogues from a word list
    Generate {
        #[arg(required = true)]
        words: Vec<String>,
    },
    /// List saved dialogues
    List,
    /// Print one dialogue
    Show { id: String },
    /// Generate audio for the lines of a dialogue
    Audio {
        id: String,
        /// Regenerate lines that already have audio
        #[arg(long)]
        force: bool,
    },
    /// Play a dialogue line by line
    Play {
        id: String,
        #[arg(long)]
        rate: Option<f32>,
    },
    Rename {
        id: String,
        #[arg(required = true)]
        title: Vec<String>,
    },
    Delete { id: String },
    /// Show or change the voices of speakers A and B
    Voices {
        #[arg(long)]
        a: Option<String>,
        #[arg(long)]
        b: Option<String>,
        /// Dialogue whose audio should be regenerated with the new voices
        #[arg(long)]
        dialogue: Option<String>,
        #[arg(long)]
        list: bool,
    },
    /// Save the API key (empty clears it)
    SetKey { key: Option<String> },
    /// Write the audio of a dialogue into one file
    Export { id: String, output: PathBuf },
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<AppError>() {
            Some(app) => eprintln!("{}", app.user_message()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.ensure_directories()?;

    let store = Arc::new(FileStore::new(&config.storage.path));
    let repo = Repository::new(store);
    let tts = create_tts_client(&config.tts)?;

    let Some(command) = cli.command else {
        let workflow = DialogueWorkflow::new(config, repo, tts);
        return interactive(&workflow).await;
    };

    if let Command::Serve { bind } = &command {
        if let Some(bind) = bind {
            config.server.bind = bind.clone();
        }
        let cancel = cancel_on_ctrl_c();
        return server::serve(&config, tts, cancel).await;
    }

    let workflow = DialogueWorkflow::new(config, repo, tts);
    match command {
        Command::Generate { words } => {
            generate(&workflow, &words.join(" ")).await?;
        }
        Command::List => list(&workflow).await,
        Command::Show { id } => print_dialogue(&workflow.dialogue(&id).await?),
        Command::Audio { id, force } => fill_audio(&workflow, &id, force).await?,
        Command::Play { id, rate } => {
            let dialogue = workflow.dialogue(&id).await?;
            play(&workflow, &dialogue, rate).await;
        }
        Command::Rename { id, title } => {
            let renamed = workflow.rename(&id, &title.join(" ")).await?;
            println!("Renamed to '{}'.", renamed.title);
        }
        Command::Delete { id } => {
            workflow.delete(&id).await?;
            println!("Deleted {}.", id);
        }
        Command::Voices { a, b, dialogue, list } => {
            voices(&workflow, a, b, dialogue, list).await?;
        }
        Command::SetKey { key } => match key {
            Some(key) => {
                workflow.set_api_key(&key).await?;
                println!("API key {}.", if key.trim().is_empty() { "cleared" } else { "saved" });
            }
            None => setup::prompt_api_key(&workflow).await?,
        },
        Command::Export { id, output } => {
            let count = workflow.export_audio(&id, &output).await?;
            println!("Wrote {} line(s) to {:?}.", count, output);
        }
        Command::Serve { .. } => {}
    }
    Ok(())
}

/// Token cancelled by the next Ctrl-C. Cancelling it any other way ends the
/// signal listener.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => child.cancel(),
            _ = child.cancelled() => {}
        }
    });
    token
}

// --- Commands ---

async fn generate(workflow: &DialogueWorkflow, raw: &str) -> Result<Vec<Dialogue>> {
    let cancel = cancel_on_ctrl_c();
    let _guard = cancel.clone().drop_guard();

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Writing dialogues...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    let outcome = workflow.generate_from_input(raw, &cancel).await;
    spinner.finish_and_clear();
    let outcome = outcome?;

    for dialogue in &outcome.dialogues {
        print_dialogue(dialogue);
    }
    if !outcome.missing_words.is_empty() {
        println!("Note: not used by the model: {}", outcome.missing_words.join(", "));
    }
    Ok(outcome.dialogues)
}

async fn list(workflow: &DialogueWorkflow) {
    let dialogues = workflow.dialogues().await;
    if dialogues.is_empty() {
        println!("No saved dialogues yet.");
        return;
    }
    for d in &dialogues {
        println!("{}", summary(d));
    }
}

fn summary(d: &Dialogue) -> String {
    let audio = if d.is_all_audio_loaded() { "audio" } else { "no audio" };
    let date = d.created_at.get(..10).unwrap_or(&d.created_at);
    format!("{}  {}  {}  ({} lines, {})", d.id, date, d.title, d.lines.len(), audio)
}

fn print_dialogue(d: &Dialogue) {
    println!("\n== {} ==  [{}]", d.title, d.id);
    if !d.words_used.is_empty() {
        println!("Words: {}", d.words_used.join(", "));
    }
    for line in &d.lines {
        let marker = if line.audio_url.is_some() { "" } else { "  (no audio)" };
        println!("{}: {}{}", line.speaker, line.text, marker);
    }
}

async fn fill_audio(workflow: &DialogueWorkflow, id: &str, force: bool) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let _guard = cancel.clone().drop_guard();

    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
        .progress_chars("#>-"));

    let report = workflow
        .fill_audio(id, force, &cancel, |done, total| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        })
        .await;
    pb.finish_and_clear();
    let report = report?;

    if report.requested == 0 {
        println!("Every line already has audio.");
        return Ok(());
    }
    println!("Generated audio for {}/{} line(s).", report.generated, report.requested);
    if report.cancelled {
        println!("Stopped early; run again to finish the remaining lines.");
    }
    for line_id in &report.failed {
        if let Some(line) = report.dialogue.line(line_id) {
            println!("  no audio: {}: {}", line.speaker, line.text);
        }
    }
    Ok(())
}

async fn play(workflow: &DialogueWorkflow, dialogue: &Dialogue, rate: Option<f32>) {
    let player = workflow.player();
    if let Some(rate) = rate {
        player.set_rate(rate);
    }
    if !player.play(dialogue) {
        println!("Nothing to play. Generate audio first.");
        return;
    }

    let cancel = cancel_on_ctrl_c();
    let _guard = cancel.clone().drop_guard();
    let mut rx = player.subscribe();
    let mut shown: Option<String> = None;
    loop {
        let state = rx.borrow_and_update().clone();
        if state.current_line_id != shown {
            if let Some(line) = state.current_line_id.as_deref().and_then(|id| dialogue.line(id)) {
                println!("[{:>3.0}%] {}: {}", state.progress, line.speaker, line.text);
            }
            shown = state.current_line_id.clone();
        }
        if !state.is_playing {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                player.pause();
                println!("Paused.");
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

async fn voices(
    workflow: &DialogueWorkflow,
    a: Option<String>,
    b: Option<String>,
    dialogue: Option<String>,
    list: bool,
) -> Result<()> {
    let current = workflow.voice_config().await;
    if list {
        for voice in catalog::voice_options() {
            let mut roles = Vec::new();
            if voice.id == current.a.id {
                roles.push("A");
            }
            if voice.id == current.b.id {
                roles.push("B");
            }
            println!("{:<4} {}", roles.join(","), setup::format_voice(&voice));
        }
        return Ok(());
    }

    let updated = if a.is_none() && b.is_none() {
        setup::select_voices(&current)?
    } else {
        let mut updated = current.clone();
        for (speaker, id) in [(Speaker::A, a), (Speaker::B, b)] {
            if let Some(id) = id {
                let voice = catalog::find_voice(&id).ok_or_else(|| anyhow!("Unknown voice: {}", id))?;
                updated.set_voice(speaker, voice);
            }
        }
        updated
    };

    workflow.apply_voices(&updated, dialogue.as_deref()).await?;
    println!("Speaker A: {}", updated.a.name);
    println!("Speaker B: {}", updated.b.name);
    if dialogue.is_some() {
        println!("Audio cleared; generate it again to hear the new voices.");
    }
    Ok(())
}

// --- Interactive ---

const MENU_GENERATE: &str = "Generate dialogues";
const MENU_BROWSE: &str = "Browse saved dialogues";
const MENU_VOICES: &str = "Voice settings";
const MENU_KEY: &str = "Set API key";
const MENU_QUIT: &str = "Quit";

async fn interactive(workflow: &DialogueWorkflow) -> Result<()> {
    setup::ensure_api_key(workflow).await?;

    loop {
        let choice = Select::new(
            "What would you like to do?",
            vec![MENU_GENERATE, MENU_BROWSE, MENU_VOICES, MENU_KEY, MENU_QUIT],
        )
        .prompt()?;

        let result = match choice {
            MENU_GENERATE => interactive_generate(workflow).await,
            MENU_BROWSE => browse(workflow).await,
            MENU_VOICES => voices(workflow, None, None, None, false).await,
            MENU_KEY => setup::prompt_api_key(workflow).await,
            _ => return Ok(()),
        };
        if let Err(e) = result {
            match e.downcast_ref::<AppError>() {
                Some(app) => println!("{}", app.user_message()),
                None => println!("Error: {:#}", e),
            }
        }
    }
}

async fn interactive_generate(workflow: &DialogueWorkflow) -> Result<()> {
    let raw = Text::new("Words (separated by commas or spaces):").prompt()?;
    let dialogues = generate(workflow, &raw).await?;

    if Confirm::new("Generate audio now?").with_default(true).prompt()? {
        for dialogue in &dialogues {
            println!("\n{}", dialogue.title);
            fill_audio(workflow, &dialogue.id, false).await?;
        }
    }
    Ok(())
}

const ACTION_PLAY: &str = "Play";
const ACTION_SPEED: &str = "Play at another speed";
const ACTION_AUDIO: &str = "Generate missing audio";
const ACTION_REGENERATE: &str = "Regenerate all audio";
const ACTION_VOICES: &str = "Change voices";
const ACTION_RENAME: &str = "Rename";
const ACTION_EXPORT: &str = "Export audio";
const ACTION_DELETE: &str = "Delete";
const ACTION_BACK: &str = "Back";

async fn browse(workflow: &DialogueWorkflow) -> Result<()> {
    let dialogues = workflow.dialogues().await;
    if dialogues.is_empty() {
        println!("No saved dialogues yet.");
        return Ok(());
    }
    let options: Vec<String> = dialogues.iter().map(summary).collect();
    let selection = Select::new("Dialogue:", options).prompt()?;
    let id = selection
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow!("Empty selection"))?
        .to_string();

    let mut rate = workflow.config().playback.rate;
    loop {
        let dialogue = workflow.dialogue(&id).await?;
        print_dialogue(&dialogue);

        let action = Select::new(
            "Action:",
            vec![
                ACTION_PLAY,
                ACTION_SPEED,
                ACTION_AUDIO,
                ACTION_REGENERATE,
                ACTION_VOICES,
                ACTION_RENAME,
                ACTION_EXPORT,
                ACTION_DELETE,
                ACTION_BACK,
            ],
        )
        .prompt()?;

        match action {
            ACTION_PLAY => play(workflow, &dialogue, Some(rate)).await,
            ACTION_SPEED => {
                rate = setup::select_rate(rate)?;
                play(workflow, &dialogue, Some(rate)).await;
            }
            ACTION_AUDIO => fill_audio(workflow, &id, false).await?,
            ACTION_REGENERATE => fill_audio(workflow, &id, true).await?,
            ACTION_VOICES => {
                let updated = setup::select_voices(&workflow.voice_config().await)?;
                workflow.apply_voices(&updated, Some(&id)).await?;
                if Confirm::new("Generate audio with the new voices?").with_default(true).prompt()? {
                    fill_audio(workflow, &id, false).await?;
                }
            }
            ACTION_RENAME => {
                let title = Text::new("New title:").with_initial_value(&dialogue.title).prompt()?;
                workflow.rename(&id, &title).await?;
            }
            ACTION_EXPORT => {
                let default_name = format!("{}.mp3", id);
                let path = Text::new("Output file:").with_default(&default_name).prompt()?;
                let count = workflow.export_audio(&id, &PathBuf::from(path)).await?;
                println!("Wrote {} line(s).", count);
            }
            ACTION_DELETE => {
                if Confirm::new(&format!("Delete '{}'?", dialogue.title)).with_default(false).prompt()? {
                    workflow.delete(&id).await?;
                    println!("Deleted.");
                    return Ok(());
                }
            }
            _ => return Ok(()),
        }
    }
}
