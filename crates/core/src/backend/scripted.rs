use crate::av::AvTag;
use crate::backend::{MediaBackend, PlaybackError, SoundErrorBehavior};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// What a scripted `play` call does.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedOutcome {
    Succeed,
    Fail(SoundErrorBehavior),
    /// An error outside the sound error taxonomy.
    Crash(String),
    /// Never completes on its own; only cancellation or an injected signal ends it.
    Hang,
}

impl Default for ScriptedOutcome {
    fn default() -> Self {
        Self::Succeed
    }
}

#[derive(Default)]
struct Script {
    fixed: HashMap<String, ScriptedOutcome>,
    queued: HashMap<String, VecDeque<ScriptedOutcome>>,
    calls: Vec<AvTag>,
}

/// A backend whose per-tag results are scripted up front, recording every call.
///
/// Tags are matched by [`AvTag::key`]. Queued outcomes are used first, then the
/// fixed outcome for the key, then the default.
#[derive(Default)]
pub struct ScriptedBackend {
    default: ScriptedOutcome,
    latency: Duration,
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, outcome: ScriptedOutcome) -> Self {
        self.default = outcome;
        self
    }

    /// Simulated playing time of every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_outcome<S: Into<String>>(self, key: S, outcome: ScriptedOutcome) -> Self {
        self.lock().fixed.insert(key.into(), outcome);
        self
    }

    pub fn with_sequence<S: Into<String>>(self, key: S, outcomes: Vec<ScriptedOutcome>) -> Self {
        self.lock().queued.insert(key.into(), outcomes.into());
        self
    }

    pub fn calls(&self) -> Vec<AvTag> {
        self.lock().calls.clone()
    }

    pub fn played_keys(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .map(|tag| tag.key().to_owned())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        match self.script.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn next_outcome(&self, tag: &AvTag) -> ScriptedOutcome {
        let mut script = self.lock();
        script.calls.push(tag.clone());
        let key = tag.key();
        if let Some(outcome) = script.queued.get_mut(key).and_then(VecDeque::pop_front) {
            return outcome;
        }
        script
            .fixed
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

impl MediaBackend for ScriptedBackend {
    fn play<'a>(&'a self, tag: &'a AvTag) -> BoxFuture<'a, Result<(), PlaybackError>> {
        async move {
            let outcome = self.next_outcome(tag);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            match outcome {
                ScriptedOutcome::Succeed => Ok(()),
                ScriptedOutcome::Fail(behavior) => {
                    Err(PlaybackError::sound(behavior, format!("scripted failure of {tag}")))
                }
                ScriptedOutcome::Crash(details) => Err(PlaybackError::Other(details)),
                ScriptedOutcome::Hang => futures::future::pending().await,
            }
        }
        .boxed()
    }
}
