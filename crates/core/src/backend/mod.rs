#[cfg(feature = "audio-output")]
mod audio;
mod router;
mod scripted;

use crate::av::AvTag;
use crate::tts::TtsError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "audio-output")]
pub use audio::RodioOutput;
#[cfg(feature = "playback-device-enum")]
pub use audio::enumerate_output_device_names;
pub use router::{AvTagRouter, SoundTagPlayer};
pub use scripted::{ScriptedBackend, ScriptedOutcome};

/// How playback of a group proceeds after a tag failed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SoundErrorBehavior {
    /// Try the same tag once more.
    RetryAudio,
    /// Skip to the next tag, if any.
    ContinueAudio,
    /// Abandon the rest of the group.
    StopAudio,
}

impl fmt::Display for SoundErrorBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RetryAudio => "retry",
            Self::ContinueAudio => "continue",
            Self::StopAudio => "stop",
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// A failure that tells the sequencer how to carry on.
    #[error("sound error ({behavior}): {reason}")]
    Sound {
        behavior: SoundErrorBehavior,
        reason: String,
    },

    #[error("tts failed: {0}")]
    Tts(#[from] TtsError),

    #[error("backend error: {0}")]
    Other(String),
}

impl PlaybackError {
    pub fn sound<S: Into<String>>(behavior: SoundErrorBehavior, reason: S) -> Self {
        Self::Sound {
            behavior,
            reason: reason.into(),
        }
    }

    pub fn retry<S: Into<String>>(reason: S) -> Self {
        Self::sound(SoundErrorBehavior::RetryAudio, reason)
    }

    pub fn skip<S: Into<String>>(reason: S) -> Self {
        Self::sound(SoundErrorBehavior::ContinueAudio, reason)
    }

    pub fn stop<S: Into<String>>(reason: S) -> Self {
        Self::sound(SoundErrorBehavior::StopAudio, reason)
    }

    /// The continuation behaviour carried by a sound error, `None` for anything else.
    pub fn behavior(&self) -> Option<SoundErrorBehavior> {
        match self {
            Self::Sound { behavior, .. } => Some(*behavior),
            Self::Tts(_) | Self::Other(_) => None,
        }
    }
}

/// Plays one tag to completion. The only suspension point of a playback task.
pub trait MediaBackend: Send + Sync {
    fn play<'a>(&'a self, tag: &'a AvTag) -> BoxFuture<'a, Result<(), PlaybackError>>;
}

/// Optional observer of tag failures, e.g. to show a "media missing" notice.
///
/// Playback progress never depends on a listener being installed.
pub trait MediaErrorListener: Send + Sync {
    fn on_error(&self, tag: &AvTag, error: &PlaybackError);
}

#[derive(Clone, Debug, Default)]
pub struct LoggingErrorListener;

impl MediaErrorListener for LoggingErrorListener {
    fn on_error(&self, tag: &AvTag, error: &PlaybackError) {
        match error.behavior() {
            Some(SoundErrorBehavior::ContinueAudio) => {
                tracing::warn!(tag = %tag, error = %error, "media missing or unplayable")
            }
            Some(SoundErrorBehavior::RetryAudio) | Some(SoundErrorBehavior::StopAudio) => {
                tracing::debug!(tag = %tag, error = %error, "media error")
            }
            None => tracing::warn!(tag = %tag, error = %error, "media playback failed"),
        }
    }
}
