pub mod av;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod render;
pub mod sequencer;
pub mod tts;
