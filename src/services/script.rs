use log::debug;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::core::error::{AppError, AppResult};
use crate::core::state::{Dialogue, DialogueLine, Speaker};

pub const DEFAULT_TITLE: &str = "English Dialogue Practice";

const TITLE_KEYS: [&str; 2] = ["Dialogue title", "title"];
const CONTENT_KEYS: [&str; 2] = ["Dialogue content", "content"];
const WORDS_KEYS: [&str; 2] = ["Words Used", "wordsUsed"];

static LINE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([AB]):\s*(.+)$").expect("valid line pattern"));

pub fn build_dialogue_prompt(words: &[String]) -> String {
    format!(
        r#"## Persona & Role
You are an expert English dialogue writer and a creative ESL teacher. Your dialogues sound genuinely authentic and natural, as if spoken by native speakers in a real, everyday situation.

Guiding principles:
1. Everyday authenticity: mirror real, casual conversations (making plans, grocery shopping, hobbies, ordering food, a recent movie). Use common contractions (I'm, it's, don't, you've) and simple fillers (Oh, Well, Hmm, You know).
2. Simple and accessible: language must be clear and easy for beginner-to-intermediate learners. Avoid complex grammar, obscure idioms and formal register.
3. Natural flow: questions, answers, reactions and follow-ups. It must feel like a genuine, interactive chat.

## Task
Take the list of English words below and create one or more short, authentic, easy-to-understand dialogues that use every single word from the list.

## Rules
1. Analyze the whole word list.
2. Group the words into everyday themes if they cannot all fit into one natural conversation. Multiple dialogues are encouraged.
3. Give each dialogue a short descriptive title (e.g. "Catching Up with a Friend").
4. Write each dialogue between two people, A and B, set in a common everyday situation.
5. Weave the words in naturally.
6. All other words must be common everyday English.
7. You MUST use every word from the list exactly as provided.
8. Your entire output must be a single valid JSON array with no text outside of it.

## Output Format
A JSON array of objects, each with exactly these keys:
1. "Dialogue title": the title string.
2. "Dialogue content": the whole conversation in one string, lines separated by \n, each line starting with "A: " or "B: ".
3. "Words Used": an array of the input words used in that dialogue.

Example:
[
  {{
    "Dialogue title": "Title for Dialogue 1",
    "Dialogue content": "A: This is the first line.\nB: This is the second line.",
    "Words Used": ["word_a", "word_b"]
  }}
]

## Input Words List:
{}"#,
        words.join(", ")
    )
}

/// Returns the first balanced `[...]` slice of `text` that parses as a JSON
/// array. Brackets inside JSON strings are ignored while balancing.
pub fn extract_json_array(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('[') {
        let open = search_from + offset;
        if let Some(close) = find_matching_bracket(bytes, open) {
            let candidate = &text[open..=close];
            let is_array = serde_json::from_str::<Value>(candidate)
                .map(|v| v.is_array())
                .unwrap_or(false);
            if is_array {
                return Some(candidate);
            }
        }
        search_from = open + 1;
    }
    None
}

fn find_matching_bracket(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return (b == b']').then_some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses `A: text` / `B: text` lines. Anything else is dropped so a few
/// malformed lines never discard a whole dialogue.
pub fn parse_dialogue_lines(content: &str) -> Vec<DialogueLine> {
    content
        .split('\n')
        .map(|entry| entry.trim_end_matches('\r'))
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let Some(caps) = LINE_PATTERN.captures(entry) else {
                debug!("Dropping unrecognized dialogue line: {:?}", entry);
                return None;
            };
            let speaker = if &caps[1] == "A" { Speaker::A } else { Speaker::B };
            let text = caps[2].trim();
            if text.is_empty() {
                return None;
            }
            Some(DialogueLine::new(speaker, text))
        })
        .collect()
}

/// Converts a model response into dialogues, one per JSON object.
pub fn parse_dialogues(response: &str) -> AppResult<Vec<Dialogue>> {
    let json = extract_json_array(response).ok_or_else(|| {
        AppError::ResponseFormat("no JSON array found in model response".to_string())
    })?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| AppError::ResponseFormat(format!("invalid JSON array: {}", e)))?;
    let items = value
        .as_array()
        .ok_or_else(|| AppError::ResponseFormat("expected a JSON array".to_string()))?;
    if items.is_empty() {
        return Err(AppError::ResponseFormat("model returned no dialogues".to_string()));
    }
    items.iter().map(dialogue_from_value).collect()
}

fn dialogue_from_value(value: &Value) -> AppResult<Dialogue> {
    let object = value
        .as_object()
        .ok_or_else(|| AppError::ResponseFormat("dialogue entry is not an object".to_string()))?;

    let title = lookup(object, &TITLE_KEYS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE);
    let content = lookup(object, &CONTENT_KEYS).and_then(Value::as_str).unwrap_or("");
    let words_used = lookup(object, &WORDS_KEYS)
        .and_then(Value::as_array)
        .map(|words| {
            words
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Dialogue::new(title, parse_dialogue_lines(content), words_used))
}

fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| object.get(*k))
}

/// Input words that appear in no dialogue's `words_used` list, compared
/// case-insensitively.
pub fn missing_words(words: &[String], dialogues: &[Dialogue]) -> Vec<String> {
    let reported: HashSet<String> = dialogues
        .iter()
        .flat_map(|d| d.words_used.iter())
        .map(|w| w.trim().to_lowercase())
        .collect();

    words
        .iter()
        .filter(|word| !reported.contains(&word.trim().to_lowercase()))
        .cloned()
        .collect()
}
