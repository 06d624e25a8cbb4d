use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, time::Duration};

pub const DEFAULT_TTS_INIT_TIMEOUT_MS: u64 = 2_500;
pub const DEFAULT_OPTIONS_GROUP: OptionsGroupId = OptionsGroupId(1);
pub const ENV_TTS_INIT_TIMEOUT_MS: &str = "CARD_MEDIA_TTS_TIMEOUT_MS";
pub const ENV_MEDIA_DIR: &str = "CARD_MEDIA_DIR";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeckId(pub i64);

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CardId(pub i64);

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OptionsGroupId(pub i64);

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The parts of a card this crate cares about.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Card {
    pub id: CardId,
    pub deck_id: DeckId,
    /// Home deck of a card that currently sits in a filtered deck.
    #[serde(default)]
    pub original_deck_id: Option<DeckId>,
}

impl Card {
    pub fn new(id: CardId, deck_id: DeckId) -> Self {
        Self {
            id,
            deck_id,
            original_deck_id: None,
        }
    }

    /// Filtered decks play with the options of the card's home deck.
    pub fn effective_deck_id(&self) -> DeckId {
        self.original_deck_id.unwrap_or(self.deck_id)
    }
}

/// Per-card playback policy, resolved from deck options once per card shown.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardSoundConfig {
    pub deck_id: DeckId,
    pub autoplay: bool,
    pub replay_question: bool,
}

impl CardSoundConfig {
    /// Whether this config can be reused for `card` without asking the store again.
    pub fn applies_to(&self, card: &Card) -> bool {
        self.deck_id == card.effective_deck_id()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeckOptions {
    #[serde(default = "enabled")]
    pub autoplay: bool,
    #[serde(default = "enabled")]
    pub replay_question: bool,
}

fn enabled() -> bool {
    true
}

impl Default for DeckOptions {
    fn default() -> Self {
        Self {
            autoplay: true,
            replay_question: true,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown deck {0}")]
    UnknownDeck(DeckId),
    #[error("deck {deck} refers to missing options group {group:?}")]
    MissingOptionsGroup { deck: DeckId, group: OptionsGroupId },
    #[error("tts init timeout must be > 0 ms")]
    ZeroTtsTimeout,
    #[error("invalid value for {key}: {value}")]
    InvalidEnvValue { key: String, value: String },
}

/// Source of deck configuration, queried once per card load.
pub trait DeckConfigStore: Send + Sync {
    fn resolve_sound_config<'a>(
        &'a self,
        card: &'a Card,
    ) -> BoxFuture<'a, Result<CardSoundConfig, ConfigError>>;
}

/// Decks mapped onto shared options groups, the way deck options are stored.
#[derive(Clone, Debug)]
pub struct InMemoryDeckConfigStore {
    decks: BTreeMap<DeckId, OptionsGroupId>,
    groups: BTreeMap<OptionsGroupId, DeckOptions>,
}

impl Default for InMemoryDeckConfigStore {
    fn default() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(DEFAULT_OPTIONS_GROUP, DeckOptions::default());
        Self {
            decks: BTreeMap::new(),
            groups,
        }
    }
}

impl InMemoryDeckConfigStore {
    pub fn with_options_group(mut self, group: OptionsGroupId, options: DeckOptions) -> Self {
        self.groups.insert(group, options);
        self
    }

    pub fn with_deck(mut self, deck: DeckId, group: OptionsGroupId) -> Self {
        self.decks.insert(deck, group);
        self
    }

    /// A deck with its own options group that shares the deck's id.
    pub fn with_deck_options(self, deck: DeckId, options: DeckOptions) -> Self {
        let group = OptionsGroupId(deck.0);
        self.with_options_group(group, options).with_deck(deck, group)
    }

    fn lookup(&self, deck: DeckId) -> Result<DeckOptions, ConfigError> {
        let group = self
            .decks
            .get(&deck)
            .copied()
            .ok_or(ConfigError::UnknownDeck(deck))?;
        self.groups
            .get(&group)
            .copied()
            .ok_or(ConfigError::MissingOptionsGroup { deck, group })
    }
}

impl DeckConfigStore for InMemoryDeckConfigStore {
    fn resolve_sound_config<'a>(
        &'a self,
        card: &'a Card,
    ) -> BoxFuture<'a, Result<CardSoundConfig, ConfigError>> {
        async move {
            let deck_id = card.effective_deck_id();
            let options = self.lookup(deck_id)?;
            Ok(CardSoundConfig {
                deck_id,
                autoplay: options.autoplay,
                replay_question: options.replay_question,
            })
        }
        .boxed()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerSettings {
    pub tts_init_timeout_ms: u64,
}

impl PlayerSettings {
    pub fn new(tts_init_timeout_ms: u64) -> Result<Self, ConfigError> {
        if tts_init_timeout_ms == 0 {
            return Err(ConfigError::ZeroTtsTimeout);
        }
        Ok(Self {
            tts_init_timeout_ms,
        })
    }

    pub fn tts_init_timeout(&self) -> Duration {
        Duration::from_millis(self.tts_init_timeout_ms)
    }
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            tts_init_timeout_ms: DEFAULT_TTS_INIT_TIMEOUT_MS,
        }
    }
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_u64_with_default(
    cli_value: Option<u64>,
    env_key: &str,
    env: &impl Env,
    default: u64,
) -> Result<u64, ConfigError> {
    match cli_value {
        Some(v) => Ok(v),
        None => match env.var(env_key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnvValue {
                    key: env_key.to_owned(),
                    value: raw,
                }),
            None => Ok(default),
        },
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}
