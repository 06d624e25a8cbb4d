use crate::backend::{PlaybackError, SoundErrorBehavior};

/// What the sequencer does with the current tag after its first failed `play`.
///
/// A failure of the retry is never looked up here: the tag is done either way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagAction {
    /// Treat the tag as done and move to the next one.
    Advance,
    /// Play the same tag one more time.
    RetryOnce,
    /// Attempt no further tags in the group.
    StopGroup,
}

/// Action for the first failure of a tag.
///
/// Errors without a sound behaviour are treated like `ContinueAudio` so a
/// backend bug can never wedge a group.
pub fn action_after_failure(error: &PlaybackError) -> TagAction {
    match error.behavior() {
        Some(SoundErrorBehavior::RetryAudio) => TagAction::RetryOnce,
        Some(SoundErrorBehavior::ContinueAudio) => TagAction::Advance,
        Some(SoundErrorBehavior::StopAudio) => TagAction::StopGroup,
        None => TagAction::Advance,
    }
}
