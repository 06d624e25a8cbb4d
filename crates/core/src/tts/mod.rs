mod deferred;
mod tone;

use crate::av::AvTag;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use deferred::DeferredTtsPlayer;
pub use tone::{ToneSynthesizer, TtsAudio};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TtsRequest {
    pub text: String,
    pub language: String,
    pub voices: Vec<String>,
    pub speed: f32,
}

impl TtsRequest {
    /// `None` for tags that are not text-to-speech.
    pub fn from_tag(tag: &AvTag) -> Option<Self> {
        match tag {
            AvTag::TextToSpeech {
                field_text,
                language,
                voices,
                speed,
            } => Some(Self {
                text: field_text.clone(),
                language: language.clone(),
                voices: voices.clone(),
                speed: *speed,
            }),
            AvTag::MediaFile { .. } => None,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TtsError {
    #[error("no tts engine configured")]
    Unavailable,

    #[error("timed out waiting for the tts engine")]
    InitTimeout,

    #[error("tts engine failed to start: {0}")]
    InitFailed(String),

    #[error("language not supported: {0}")]
    LanguageNotSupported(String),

    #[error("tts playback failed: {0}")]
    Playback(String),
}

pub trait TtsPlayer: Send + Sync {
    fn speak(&self, request: TtsRequest) -> BoxFuture<'_, Result<(), TtsError>>;
}
