use crate::av::AvTag;
use crate::backend::{MediaBackend, PlaybackError};
use crate::tts::{DeferredTtsPlayer, TtsError, TtsRequest};
use futures::future::BoxFuture;
use futures::FutureExt;

/// Plays a sound or video file referenced by a `[sound:...]` tag.
pub trait SoundTagPlayer: Send + Sync {
    fn play_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), PlaybackError>>;
}

/// Sends media files to a [`SoundTagPlayer`] and speech to a TTS engine.
pub struct AvTagRouter<S> {
    sound: S,
    tts: Option<DeferredTtsPlayer>,
}

impl<S: SoundTagPlayer> AvTagRouter<S> {
    pub fn new(sound: S) -> Self {
        Self { sound, tts: None }
    }

    pub fn with_tts(mut self, tts: DeferredTtsPlayer) -> Self {
        self.tts = Some(tts);
        self
    }

    async fn speak(&self, request: TtsRequest) -> Result<(), PlaybackError> {
        let tts = self.tts.as_ref().ok_or(TtsError::Unavailable)?;
        let player = tts.get().await?;
        player.speak(request).await?;
        Ok(())
    }
}

impl<S: SoundTagPlayer> MediaBackend for AvTagRouter<S> {
    fn play<'a>(&'a self, tag: &'a AvTag) -> BoxFuture<'a, Result<(), PlaybackError>> {
        async move {
            match tag {
                AvTag::MediaFile { path } => self.sound.play_file(path).await,
                AvTag::TextToSpeech {
                    field_text,
                    language,
                    voices,
                    speed,
                } => {
                    let request = TtsRequest {
                        text: field_text.clone(),
                        language: language.clone(),
                        voices: voices.clone(),
                        speed: *speed,
                    };
                    self.speak(request).await
                }
            }
        }
        .boxed()
    }
}
