pub mod audio;
pub mod dialogue;
pub mod llm;
pub mod player;
pub mod script;
pub mod setup;
pub mod tts;
pub mod words;
pub mod workflow;
