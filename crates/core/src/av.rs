use serde::{Deserialize, Serialize};
use std::fmt;

/// A single playable unit extracted from rendered card content.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AvTag {
    /// `[sound:file]`: a sound or a video in the media directory.
    MediaFile { path: String },
    /// `{{tts lang:Field}}`: text spoken by the TTS engine.
    TextToSpeech {
        field_text: String,
        language: String,
        #[serde(default)]
        voices: Vec<String>,
        #[serde(default = "default_speed")]
        speed: f32,
    },
}

fn default_speed() -> f32 {
    1.0
}

impl AvTag {
    pub fn media<S: Into<String>>(path: S) -> Self {
        Self::MediaFile { path: path.into() }
    }

    pub fn tts<T: Into<String>, L: Into<String>>(field_text: T, language: L) -> Self {
        Self::TextToSpeech {
            field_text: field_text.into(),
            language: language.into(),
            voices: Vec::new(),
            speed: default_speed(),
        }
    }

    /// The file path for media tags, the spoken text for TTS tags.
    pub fn key(&self) -> &str {
        match self {
            Self::MediaFile { path } => path,
            Self::TextToSpeech { field_text, .. } => field_text,
        }
    }
}

impl fmt::Display for AvTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MediaFile { path } => write!(f, "[sound:{path}]"),
            Self::TextToSpeech {
                field_text,
                language,
                ..
            } => write!(f, "[tts {language}:{field_text}]"),
        }
    }
}

/// The side of a card a user can look at.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CardSide {
    Front,
    Back,
}

/// The side a sound group belongs to. `Both` only arises when the answer is
/// replayed together with the question.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Front,
    Back,
    Both,
}

impl From<CardSide> for Side {
    fn from(side: CardSide) -> Self {
        match side {
            CardSide::Front => Side::Front,
            CardSide::Back => Side::Back,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Front => "front",
            Side::Back => "back",
            Side::Both => "front+back",
        })
    }
}

/// Ordered tags of one side, in the order they appear in the rendered markup.
#[derive(Clone, Debug, PartialEq)]
pub struct SoundGroup {
    side: Side,
    tags: Vec<AvTag>,
}

impl SoundGroup {
    pub fn new(side: Side, tags: Vec<AvTag>) -> Self {
        Self { side, tags }
    }

    pub fn empty(side: Side) -> Self {
        Self::new(side, Vec::new())
    }

    /// Question tags followed by answer tags, as a `Both` group.
    pub fn question_and_answer(front: &SoundGroup, back: &SoundGroup) -> Self {
        let tags = front.tags.iter().chain(back.tags.iter()).cloned().collect();
        Self::new(Side::Both, tags)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn tags(&self) -> &[AvTag] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn into_tags(self) -> Vec<AvTag> {
        self.tags
    }
}
