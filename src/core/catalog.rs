use crate::core::state::{Gender, VoiceConfig, VoiceOption};

/// Volcengine voices offered for the two speaker roles.
const VOICE_TABLE: [(&str, &str, Gender); 12] = [
    ("BV511_streaming", "Lazy Female - Ava", Gender::Female),
    ("BV505_streaming", "Argumentative Female - Alicia", Gender::Female),
    ("BV138_streaming", "Emotional Female - Lawrence", Gender::Female),
    ("BV027_streaming", "American Female - Amelia", Gender::Female),
    ("BV502_streaming", "Narrating Female - Amanda", Gender::Female),
    ("BV503_streaming", "Energetic Female - Ariana", Gender::Female),
    ("BV504_streaming", "Energetic Male - Jackson", Gender::Male),
    ("BV421_streaming", "Gifted Girl", Gender::Female),
    ("BV702_streaming", "Stefan", Gender::Male),
    ("BV506_streaming", "Innocent Child - Lily", Gender::Female),
    ("BV040_streaming", "Friendly Female - Anna", Gender::Female),
    ("BV516_streaming", "Australian Male - Henry", Gender::Male),
];

const DEFAULT_VOICE_A: usize = 0;
const DEFAULT_VOICE_B: usize = 6;

pub const PLAYBACK_RATES: [f32; 5] = [0.5, 0.75, 1.0, 1.25, 1.5];

pub fn voice_options() -> Vec<VoiceOption> {
    VOICE_TABLE.iter().map(|&(id, name, gender)| voice(id, name, gender)).collect()
}

pub fn find_voice(id: &str) -> Option<VoiceOption> {
    VOICE_TABLE
        .iter()
        .find(|(voice_id, _, _)| *voice_id == id)
        .map(|&(id, name, gender)| voice(id, name, gender))
}

pub fn default_voice_config() -> VoiceConfig {
    let (a_id, a_name, a_gender) = VOICE_TABLE[DEFAULT_VOICE_A];
    let (b_id, b_name, b_gender) = VOICE_TABLE[DEFAULT_VOICE_B];
    VoiceConfig {
        a: voice(a_id, a_name, a_gender),
        b: voice(b_id, b_name, b_gender),
    }
}

fn voice(id: &str, name: &str, gender: Gender) -> VoiceOption {
    VoiceOption {
        id: id.to_string(),
        name: name.to_string(),
        gender,
    }
}
