use crate::av::{AvTag, CardSide, Side, SoundGroup};
use crate::backend::PlaybackError;
use crate::config::{Card, CardId, CardSoundConfig, ConfigError, DeckConfigStore};
use crate::render::{RenderError, TagRenderer};
use crate::sequencer::{PlaybackReport, PlaybackSequencer, PlaybackTask, TaskId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

const LOG_TARGET: &str = "coordinator";
const COMPLETION_CHANNEL_CAPACITY: usize = 16;

#[derive(thiserror::Error, Debug)]
pub enum CoordinatorError {
    #[error("failed to render card {card}: {source}")]
    Render {
        card: CardId,
        #[source]
        source: RenderError,
    },

    #[error("failed to resolve sound config for card {card}: {source}")]
    Config {
        card: CardId,
        #[source]
        source: ConfigError,
    },
}

#[derive(Default)]
struct CardState {
    card: Option<CardId>,
    question: Option<SoundGroup>,
    answer: Option<SoundGroup>,
    config: Option<CardSoundConfig>,
    current: Option<PlaybackTask>,
}

impl CardState {
    fn loaded(&self, side: CardSide) -> Option<&SoundGroup> {
        match side {
            CardSide::Front => self.question.as_ref(),
            CardSide::Back => self.answer.as_ref(),
        }
    }

    fn group_for(&self, side: CardSide) -> SoundGroup {
        self.loaded(side)
            .cloned()
            .unwrap_or_else(|| SoundGroup::empty(side.into()))
    }

    fn group(&self, side: Side) -> SoundGroup {
        match side {
            Side::Front => self.group_for(CardSide::Front),
            Side::Back => self.group_for(CardSide::Back),
            Side::Both => SoundGroup::question_and_answer(
                &self.group_for(CardSide::Front),
                &self.group_for(CardSide::Back),
            ),
        }
    }
}

/// Binds a [`PlaybackSequencer`] to "a card is showing a side".
///
/// At most one playback task is in flight. Starting a new one cancels and
/// joins the previous task first, so only one task ever talks to the backend.
/// Every group task publishes exactly one [`PlaybackReport`] to subscribers.
pub struct CardMediaCoordinator<R, C> {
    renderer: R,
    config_store: C,
    sequencer: PlaybackSequencer,
    state: Mutex<CardState>,
    enabled: AtomicBool,
    // Ids are handed out in increasing order: playing while started > finished.
    started: AtomicU64,
    finished: Arc<AtomicU64>,
    completions: broadcast::Sender<PlaybackReport>,
}

impl<R, C> CardMediaCoordinator<R, C>
where
    R: TagRenderer,
    C: DeckConfigStore,
{
    pub fn new(renderer: R, config_store: C, sequencer: PlaybackSequencer) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            renderer,
            config_store,
            sequencer,
            state: Mutex::new(CardState::default()),
            enabled: AtomicBool::new(true),
            started: AtomicU64::new(0),
            finished: Arc::new(AtomicU64::new(0)),
            completions,
        }
    }

    /// Completion reports of group playback, one per task.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackReport> {
        self.completions.subscribe()
    }

    /// Renders and stores the sound group of `side`; does not start playback.
    ///
    /// Switching to another card stops in-flight playback, drops the groups of
    /// the previous card and resolves the card's sound config.
    pub async fn load_card_sounds(&self, card: &Card, side: CardSide) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock().await;
        self.switch_card(&mut state, card).await?;
        self.render_side(&mut state, card, side).await
    }

    /// Loads both sides of `card`.
    pub async fn load_card(&self, card: &Card) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock().await;
        self.switch_card(&mut state, card).await?;
        self.render_side(&mut state, card, CardSide::Front).await?;
        self.render_side(&mut state, card, CardSide::Back).await
    }

    /// Loads both sides of `card` unless it is already loaded. Never stops playback.
    pub async fn ensure_loaded(&self, card: &Card) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock().await;
        let current = state.card == Some(card.id)
            && state.config.is_some_and(|config| config.applies_to(card))
            && state.question.is_some()
            && state.answer.is_some();
        if current {
            return Ok(());
        }
        tracing::info!(target: LOG_TARGET, card = %card.id, "loading sounds for card");
        if state.card != Some(card.id) {
            state.question = None;
            state.answer = None;
            state.card = Some(card.id);
        }
        self.resolve_config(&mut state, card).await?;
        self.render_side(&mut state, card, CardSide::Front).await?;
        self.render_side(&mut state, card, CardSide::Back).await
    }

    /// Plays the group of `side` if the deck has autoplay enabled.
    pub async fn autoplay_all_for_side(&self, side: CardSide) -> Option<TaskId> {
        let mut state = self.state.lock().await;
        if !state.config.is_some_and(|config| config.autoplay) {
            tracing::debug!(target: LOG_TARGET, side = %Side::from(side), "autoplay disabled");
            return None;
        }
        self.play_locked(&mut state, side.into()).await
    }

    /// Plays the group of `side` regardless of autoplay.
    pub async fn play_all_for_side(&self, side: Side) -> Option<TaskId> {
        let mut state = self.state.lock().await;
        self.play_locked(&mut state, side).await
    }

    /// Manual replay. Replaying the answer also replays the question when the
    /// deck asks for it. Available whether or not autoplay is on.
    pub async fn replay_all(&self, side: CardSide) -> Option<TaskId> {
        let mut state = self.state.lock().await;
        let target = match side {
            CardSide::Front => Side::Front,
            CardSide::Back if state.config.is_some_and(|config| config.replay_question) => {
                Side::Both
            }
            CardSide::Back => Side::Back,
        };
        self.play_locked(&mut state, target).await
    }

    /// Replays a single clip. Supersedes the in-flight task; publishes no report.
    pub async fn play_one(&self, tag: AvTag) -> Option<TaskId> {
        let mut state = self.state.lock().await;
        if !self.is_enabled() {
            tracing::debug!(target: LOG_TARGET, "playback disabled; not playing one tag");
            return None;
        }
        Self::stop_locked(&mut state).await;
        tracing::info!(target: LOG_TARGET, %tag, "playing one AV tag");
        let finished = Arc::clone(&self.finished);
        let task = self.sequencer.spawn_tags(
            None,
            vec![tag],
            Some(Box::new(move |report: PlaybackReport| {
                finished.fetch_max(report.task.get(), Ordering::AcqRel);
            })),
        );
        Some(self.track(&mut state, task))
    }

    /// Cancels the in-flight task and waits for it to wind down.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        Self::stop_locked(&mut state).await;
    }

    /// Disabling stops playback and refuses new tasks until re-enabled.
    /// Enabling does not restart anything.
    pub async fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            Self::stop_locked(&mut state).await;
        }
        tracing::info!(target: LOG_TARGET, enabled, "playback enabled state changed");
    }

    /// The video of the in-flight tag was hidden or paused: stop the group.
    pub fn on_video_paused(&self) {
        tracing::info!(target: LOG_TARGET, "video paused");
        if !self
            .sequencer
            .resolve_current_tag(Err(PlaybackError::stop("video paused")))
        {
            tracing::debug!(target: LOG_TARGET, "video paused with no tag in flight");
        }
    }

    /// The video of the in-flight tag played to the end: move to the next tag.
    pub fn on_video_finished(&self) {
        if !self.sequencer.resolve_current_tag(Ok(())) {
            tracing::debug!(target: LOG_TARGET, "video finished with no tag in flight");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.started.load(Ordering::Acquire) > self.finished.load(Ordering::Acquire)
    }

    pub async fn has_media(&self, side: CardSide) -> bool {
        let state = self.state.lock().await;
        state.loaded(side).is_some_and(|group| !group.is_empty())
    }

    pub async fn config(&self) -> Option<CardSoundConfig> {
        self.state.lock().await.config
    }

    async fn switch_card(&self, state: &mut CardState, card: &Card) -> Result<(), CoordinatorError> {
        if state.card == Some(card.id) {
            if state.config.is_some_and(|config| config.applies_to(card)) {
                return Ok(());
            }
            tracing::info!(target: LOG_TARGET, card = %card.id, "card moved deck; resolving sound config again");
            return self.resolve_config(state, card).await;
        }
        tracing::info!(target: LOG_TARGET, card = %card.id, "loading sounds for card");
        Self::stop_locked(state).await;
        state.question = None;
        state.answer = None;
        state.card = Some(card.id);
        self.resolve_config(state, card).await
    }

    async fn resolve_config(&self, state: &mut CardState, card: &Card) -> Result<(), CoordinatorError> {
        // Never leave the previous card's policy behind a failed lookup.
        state.config = None;
        let config = self
            .config_store
            .resolve_sound_config(card)
            .await
            .map_err(|source| CoordinatorError::Config {
                card: card.id,
                source,
            })?;
        tracing::debug!(target: LOG_TARGET, card = %card.id, ?config, "resolved sound config");
        state.config = Some(config);
        Ok(())
    }

    async fn render_side(
        &self,
        state: &mut CardState,
        card: &Card,
        side: CardSide,
    ) -> Result<(), CoordinatorError> {
        let tags = self
            .renderer
            .render_tags(card, side)
            .await
            .map_err(|source| CoordinatorError::Render {
                card: card.id,
                source,
            })?;
        let group = SoundGroup::new(side.into(), tags);
        match side {
            CardSide::Front => state.question = Some(group),
            CardSide::Back => state.answer = Some(group),
        }
        Ok(())
    }

    async fn play_locked(&self, state: &mut CardState, side: Side) -> Option<TaskId> {
        if !self.is_enabled() {
            tracing::debug!(target: LOG_TARGET, %side, "playback disabled; not playing sounds");
            return None;
        }
        let group = state.group(side);
        // The old task must be neutralised before the new one reaches the backend.
        Self::stop_locked(state).await;
        tracing::info!(target: LOG_TARGET, %side, tags = group.len(), "playing sounds");

        let finished = Arc::clone(&self.finished);
        let completions = self.completions.clone();
        let task = self.sequencer.play_group(group, move |report| {
            finished.fetch_max(report.task.get(), Ordering::AcqRel);
            // Err only means nobody is subscribed.
            let _ = completions.send(report);
        });
        Some(self.track(state, task))
    }

    fn track(&self, state: &mut CardState, task: PlaybackTask) -> TaskId {
        let id = task.id();
        self.started.fetch_max(id.get(), Ordering::AcqRel);
        state.current = Some(task);
        id
    }

    async fn stop_locked(state: &mut CardState) {
        let Some(task) = state.current.take() else {
            return;
        };
        if task.is_finished() {
            return;
        }
        tracing::info!(target: LOG_TARGET, task = %task.id(), "stopping AV tag playback");
        if let Err(e) = task.cancel_and_join().await {
            tracing::warn!(target: LOG_TARGET, error = %e, "playback task ended abnormally");
        }
    }
}

impl<R, C> Drop for CardMediaCoordinator<R, C> {
    fn drop(&mut self) {
        if let Some(task) = self.state.get_mut().current.take() {
            task.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MediaBackend, ScriptedBackend, ScriptedOutcome, SoundErrorBehavior};
    use crate::config::{DeckId, DeckOptions, InMemoryDeckConfigStore};
    use crate::render::InMemoryRenderer;
    use crate::sequencer::GroupOutcome;
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;

    const DECK: DeckId = DeckId(1);
    const CARD: CardId = CardId(100);
    const OTHER_CARD: CardId = CardId(200);

    struct CountingStore {
        inner: InMemoryDeckConfigStore,
        resolved: AtomicUsize,
    }

    impl DeckConfigStore for CountingStore {
        fn resolve_sound_config<'a>(
            &'a self,
            card: &'a Card,
        ) -> BoxFuture<'a, Result<CardSoundConfig, ConfigError>> {
            self.resolved.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve_sound_config(card)
        }
    }

    type TestCoordinator = CardMediaCoordinator<InMemoryRenderer, CountingStore>;

    fn card(id: CardId) -> Card {
        Card::new(id, DECK)
    }

    fn coordinator_with(
        backend: &Arc<ScriptedBackend>,
        options: DeckOptions,
        question: &[&str],
        answer: &[&str],
    ) -> TestCoordinator {
        let tags = |paths: &[&str]| paths.iter().map(|p| AvTag::media(*p)).collect::<Vec<_>>();
        let renderer = InMemoryRenderer::new()
            .with_card(CARD, tags(question), tags(answer))
            .with_card(OTHER_CARD, tags(&["other_q.mp3"]), tags(&["other_a.mp3"]));
        let store = CountingStore {
            inner: InMemoryDeckConfigStore::default().with_deck_options(DECK, options),
            resolved: AtomicUsize::new(0),
        };
        let sequencer = PlaybackSequencer::new(Arc::clone(backend) as Arc<dyn MediaBackend>);
        CardMediaCoordinator::new(renderer, store, sequencer)
    }

    fn defaults() -> DeckOptions {
        DeckOptions::default()
    }

    async fn wait_for_calls(backend: &ScriptedBackend, n: usize) {
        while backend.call_count() < n {
            tokio::task::yield_now().await;
        }
    }

    async fn loaded(
        backend: &Arc<ScriptedBackend>,
        options: DeckOptions,
        question: &[&str],
        answer: &[&str],
    ) -> TestCoordinator {
        let coordinator = coordinator_with(backend, options, question, answer);
        coordinator.load_card(&card(CARD)).await.expect("card loads");
        coordinator
    }

    #[tokio::test]
    async fn autoplay_front_plays_only_question_tags() {
        let backend = Arc::new(ScriptedBackend::new());
        let coordinator = loaded(&backend, defaults(), &["q1.mp3", "q2.mp3"], &["a1.mp3"]).await;
        let mut completions = coordinator.subscribe();

        let task = coordinator
            .autoplay_all_for_side(CardSide::Front)
            .await
            .expect("autoplay on");
        let report = completions.recv().await.expect("completion");

        assert_eq!(report.task, task);
        assert_eq!(report.side, Some(Side::Front));
        assert_eq!(report.outcome, GroupOutcome::Finished);
        assert_eq!(backend.played_keys(), vec!["q1.mp3", "q2.mp3"]);
    }

    #[tokio::test]
    async fn autoplay_back_plays_only_answer_tags() {
        let backend = Arc::new(ScriptedBackend::new());
        let coordinator = loaded(&backend, defaults(), &["q1.mp3"], &["a1.mp3", "a2.mp3"]).await;
        let mut completions = coordinator.subscribe();

        coordinator.autoplay_all_for_side(CardSide::Back).await;
        completions.recv().await.expect("completion");

        assert_eq!(backend.played_keys(), vec!["a1.mp3", "a2.mp3"]);
    }

    #[tokio::test]
    async fn autoplay_off_starts_nothing_but_replay_still_works() {
        let backend = Arc::new(ScriptedBackend::new());
        let options = DeckOptions {
            autoplay: false,
            replay_question: false,
        };
        let coordinator = loaded(&backend, options, &["q1.mp3"], &["a1.mp3"]).await;
        let mut completions = coordinator.subscribe();

        assert_eq!(coordinator.autoplay_all_for_side(CardSide::Front).await, None);
        assert_eq!(backend.call_count(), 0);

        coordinator.replay_all(CardSide::Front).await.expect("replay allowed");
        completions.recv().await.expect("completion");
        assert_eq!(backend.played_keys(), vec!["q1.mp3"]);
    }

    #[tokio::test]
    async fn replaying_answer_includes_question_when_configured() {
        let backend = Arc::new(ScriptedBackend::new());
        let coordinator = loaded(&backend, defaults(), &["q1.mp3", "q2.mp3"], &["a1.mp3", "a2.mp3"]).await;
        let mut completions = coordinator.subscribe();

        coordinator.replay_all(CardSide::Back).await.expect("replays");
        let report = completions.recv().await.expect("completion");

        assert_eq!(report.side, Some(Side::Both));
        assert_eq!(report.tag_count, 4);
        assert_eq!(
            backend.played_keys(),
            vec!["q1.mp3", "q2.mp3", "a1.mp3", "a2.mp3"]
        );
    }

    #[tokio::test]
    async fn replaying_answer_without_replay_question_plays_answer_only() {
        let backend = Arc::new(ScriptedBackend::new());
        let options = DeckOptions {
            autoplay: true,
            replay_question: false,
        };
        let coordinator = loaded(&backend, options, &["q1.mp3"], &["a1.mp3", "a2.mp3"]).await;
        let mut completions = coordinator.subscribe();

        coordinator.replay_all(CardSide::Back).await.expect("replays");
        let report = completions.recv().await.expect("completion");

        assert_eq!(report.side, Some(Side::Back));
        assert_eq!(backend.played_keys(), vec!["a1.mp3", "a2.mp3"]);
    }

    #[tokio::test]
    async fn replaying_front_never_includes_answer() {
        let backend = Arc::new(ScriptedBackend::new());
        let coordinator = loaded(&backend, defaults(), &["q1.mp3"], &["a1.mp3"]).await;
        let mut completions = coordinator.subscribe();

        coordinator.replay_all(CardSide::Front).await.expect("replays");
        completions.recv().await.expect("completion");

        assert_eq!(backend.played_keys(), vec!["q1.mp3"]);
    }

    #[tokio::test]
    async fn video_pause_stops_the_rest_of_the_group() {
        let backend = Arc::new(ScriptedBackend::new().with_outcome("clip.mp4", ScriptedOutcome::Hang));
        let coordinator = loaded(&backend, defaults(), &["clip.mp4", "q2.mp3", "q3.mp3"], &[]).await;
        let mut completions = coordinator.subscribe();

        coordinator.autoplay_all_for_side(CardSide::Front).await;
        wait_for_calls(&backend, 1).await;
        assert!(coordinator.is_playing());
        coordinator.on_video_paused();
        let report = completions.recv().await.expect("completion");

        assert_eq!(report.outcome, GroupOutcome::Stopped);
        assert_eq!(backend.played_keys(), vec!["clip.mp4"]);
        assert!(!coordinator.is_playing());
        assert!(completions.try_recv().is_err());
    }

    #[tokio::test]
    async fn video_finish_moves_on_to_the_next_tag() {
        let backend = Arc::new(ScriptedBackend::new().with_outcome("clip.mp4", ScriptedOutcome::Hang));
        let coordinator = loaded(&backend, defaults(), &["clip.mp4", "q2.mp3"], &[]).await;
        let mut completions = coordinator.subscribe();

        coordinator.autoplay_all_for_side(CardSide::Front).await;
        wait_for_calls(&backend, 1).await;
        coordinator.on_video_finished();
        let report = completions.recv().await.expect("completion");

        assert_eq!(report.outcome, GroupOutcome::Finished);
        assert_eq!(backend.played_keys(), vec!["clip.mp4", "q2.mp3"]);
    }

    #[tokio::test]
    async fn video_signals_without_playback_are_ignored() {
        let backend = Arc::new(ScriptedBackend::new());
        let coordinator = loaded(&backend, defaults(), &["q1.mp3"], &[]).await;
        coordinator.on_video_paused();
        coordinator.on_video_finished();
        assert!(!coordinator.is_playing());
    }

    #[tokio::test]
    async fn disabling_cancels_playback_and_blocks_new_tasks() {
        let backend = Arc::new(ScriptedBackend::new().with_outcome("q1.mp3", ScriptedOutcome::Hang));
        let coordinator = loaded(&backend, defaults(), &["q1.mp3", "q2.mp3"], &["a1.mp3"]).await;
        let mut completions = coordinator.subscribe();

        coordinator.autoplay_all_for_side(CardSide::Front).await;
        wait_for_calls(&backend, 1).await;
        coordinator.set_enabled(false).await;

        let report = completions.recv().await.expect("completion");
        assert_eq!(report.outcome, GroupOutcome::Cancelled);
        assert!(!coordinator.is_enabled());
        assert!(!coordinator.is_playing());

        assert_eq!(coordinator.autoplay_all_for_side(CardSide::Back).await, None);
        assert_eq!(coordinator.replay_all(CardSide::Back).await, None);
        assert_eq!(coordinator.play_one(AvTag::media("x.mp3")).await, None);
        assert_eq!(backend.played_keys(), vec!["q1.mp3"]);

        coordinator.set_enabled(true).await;
        assert!(coordinator.is_enabled());
        assert_eq!(backend.call_count(), 1);

        coordinator.autoplay_all_for_side(CardSide::Back).await.expect("enabled again");
        completions.recv().await.expect("completion");
        assert_eq!(backend.played_keys(), vec!["q1.mp3", "a1.mp3"]);
    }

    #[tokio::test]
    async fn new_task_supersedes_the_old_one() {
        let backend = Arc::new(ScriptedBackend::new().with_outcome("q1.mp3", ScriptedOutcome::Hang));
        let coordinator = loaded(&backend, defaults(), &["q1.mp3", "q2.mp3"], &["a1.mp3"]).await;
        let mut completions = coordinator.subscribe();

        let first = coordinator
            .autoplay_all_for_side(CardSide::Front)
            .await
            .expect("starts");
        wait_for_calls(&backend, 1).await;
        let second = coordinator
            .autoplay_all_for_side(CardSide::Back)
            .await
            .expect("starts");

        let old = completions.recv().await.expect("old completion");
        let new = completions.recv().await.expect("new completion");

        assert_eq!(old.task, first);
        assert_eq!(old.outcome, GroupOutcome::Cancelled);
        assert_eq!(new.task, second);
        assert_eq!(new.outcome, GroupOutcome::Finished);
        assert_eq!(backend.played_keys(), vec!["q1.mp3", "a1.mp3"]);
    }

    #[tokio::test]
    async fn every_failure_path_publishes_exactly_one_report() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_outcome("q1.mp3", ScriptedOutcome::Fail(SoundErrorBehavior::RetryAudio))
                .with_outcome("q2.mp3", ScriptedOutcome::Fail(SoundErrorBehavior::ContinueAudio))
                .with_outcome("q3.mp3", ScriptedOutcome::Crash("decoder bug".into())),
        );
        let coordinator = loaded(&backend, defaults(), &["q1.mp3", "q2.mp3", "q3.mp3"], &[]).await;
        let mut completions = coordinator.subscribe();

        coordinator.autoplay_all_for_side(CardSide::Front).await;
        let report = completions.recv().await.expect("completion");
        coordinator.stop().await;

        assert_eq!(report.outcome, GroupOutcome::Finished);
        assert_eq!(
            backend.played_keys(),
            vec!["q1.mp3", "q1.mp3", "q2.mp3", "q3.mp3"]
        );
        assert!(completions.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_side_still_publishes_completion() {
        let backend = Arc::new(ScriptedBackend::new());
        let coordinator = loaded(&backend, defaults(), &[], &["a1.mp3"]).await;
        let mut completions = coordinator.subscribe();

        assert!(!coordinator.has_media(CardSide::Front).await);
        assert!(coordinator.has_media(CardSide::Back).await);

        coordinator.autoplay_all_for_side(CardSide::Front).await.expect("starts");
        let report = completions.recv().await.expect("completion");
        assert_eq!(report.tag_count, 0);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn config_is_resolved_once_per_card() {
        let backend = Arc::new(ScriptedBackend::new());
        let coordinator = coordinator_with(&backend, defaults(), &["q1.mp3"], &["a1.mp3"]);

        coordinator
            .load_card_sounds(&card(CARD), CardSide::Front)
            .await
            .expect("front loads");
        coordinator
            .load_card_sounds(&card(CARD), CardSide::Back)
            .await
            .expect("back loads");
        assert_eq!(coordinator.config_store.resolved.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.renderer.render_count(), 2);

        coordinator
            .load_card_sounds(&card(OTHER_CARD), CardSide::Front)
            .await
            .expect("other card loads");
        assert_eq!(coordinator.config_store.resolved.load(Ordering::SeqCst), 2);
        assert!(!coordinator.has_media(CardSide::Back).await);
    }

    #[tokio::test]
    async fn switching_cards_stops_playback() {
        let backend = Arc::new(ScriptedBackend::new().with_outcome("q1.mp3", ScriptedOutcome::Hang));
        let coordinator = loaded(&backend, defaults(), &["q1.mp3", "q2.mp3"], &[]).await;
        let mut completions = coordinator.subscribe();

        coordinator.autoplay_all_for_side(CardSide::Front).await;
        wait_for_calls(&backend, 1).await;
        coordinator
            .load_card_sounds(&card(OTHER_CARD), CardSide::Front)
            .await
            .expect("other card loads");

        let report = completions.recv().await.expect("completion");
        assert_eq!(report.outcome, GroupOutcome::Cancelled);
        assert!(!coordinator.is_playing());
        assert_eq!(backend.played_keys(), vec!["q1.mp3"]);
    }

    #[tokio::test]
    async fn ensure_loaded_keeps_playing_the_current_card() {
        let backend = Arc::new(ScriptedBackend::new().with_outcome("q1.mp3", ScriptedOutcome::Hang));
        let coordinator = loaded(&backend, defaults(), &["q1.mp3"], &[]).await;
        let renders = coordinator.renderer.render_count();

        coordinator.autoplay_all_for_side(CardSide::Front).await;
        wait_for_calls(&backend, 1).await;
        coordinator.ensure_loaded(&card(CARD)).await.expect("already loaded");

        assert!(coordinator.is_playing());
        assert_eq!(coordinator.renderer.render_count(), renders);
        coordinator.stop().await;
        assert!(!coordinator.is_playing());
    }

    #[tokio::test]
    async fn render_failure_is_reported() {
        let backend = Arc::new(ScriptedBackend::new());
        let coordinator = coordinator_with(&backend, defaults(), &[], &[]);
        let missing = Card::new(CardId(404), DECK);

        let err = coordinator
            .load_card_sounds(&missing, CardSide::Front)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Render {
                card: CardId(404),
                source: RenderError::CardNotFound(CardId(404))
            }
        ));
    }

    #[tokio::test]
    async fn unknown_deck_is_reported() {
        let backend = Arc::new(ScriptedBackend::new());
        let coordinator = coordinator_with(&backend, defaults(), &["q1.mp3"], &[]);
        let stray = Card::new(CARD, DeckId(77));

        let err = coordinator.load_card(&stray).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Config { .. }));
        assert_eq!(coordinator.config().await, None);
    }

    #[tokio::test]
    async fn reloading_a_moved_card_uses_its_new_deck_options() {
        let quiet_deck = DeckId(2);
        let backend = Arc::new(ScriptedBackend::new());
        let renderer = InMemoryRenderer::new().with_card(
            CARD,
            vec![AvTag::media("q1.mp3")],
            vec![AvTag::media("a1.mp3")],
        );
        let store = CountingStore {
            inner: InMemoryDeckConfigStore::default()
                .with_deck_options(DECK, defaults())
                .with_deck_options(
                    quiet_deck,
                    DeckOptions {
                        autoplay: false,
                        replay_question: false,
                    },
                ),
            resolved: AtomicUsize::new(0),
        };
        let sequencer = PlaybackSequencer::new(Arc::clone(&backend) as Arc<dyn MediaBackend>);
        let coordinator = CardMediaCoordinator::new(renderer, store, sequencer);

        coordinator.load_card(&card(CARD)).await.expect("card loads");
        coordinator
            .load_card(&Card::new(CARD, quiet_deck))
            .await
            .expect("moved card loads");

        let config = coordinator.config().await.expect("config resolved");
        assert_eq!(config.deck_id, quiet_deck);
        assert!(!config.autoplay);
        assert_eq!(coordinator.config_store.resolved.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.autoplay_all_for_side(CardSide::Front).await, None);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn failed_ensure_loaded_drops_the_previous_cards_config() {
        let backend = Arc::new(ScriptedBackend::new());
        let coordinator = loaded(&backend, defaults(), &["q1.mp3"], &["a1.mp3"]).await;
        let stray = Card::new(OTHER_CARD, DeckId(77));

        assert!(coordinator.ensure_loaded(&stray).await.is_err());
        assert_eq!(coordinator.config().await, None);
        assert_eq!(coordinator.autoplay_all_for_side(CardSide::Front).await, None);

        // The next load of that card looks its config up again.
        let resolved = coordinator.config_store.resolved.load(Ordering::SeqCst);
        assert!(coordinator.load_card(&stray).await.is_err());
        assert_eq!(
            coordinator.config_store.resolved.load(Ordering::SeqCst),
            resolved + 1
        );
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn play_one_supersedes_without_publishing() {
        let backend = Arc::new(ScriptedBackend::new().with_outcome("q1.mp3", ScriptedOutcome::Hang));
        let coordinator = loaded(&backend, defaults(), &["q1.mp3"], &[]).await;
        let mut completions = coordinator.subscribe();

        coordinator.autoplay_all_for_side(CardSide::Front).await;
        wait_for_calls(&backend, 1).await;
        coordinator.play_one(AvTag::tts("hello", "en_US")).await.expect("plays");

        let old = completions.recv().await.expect("old completion");
        assert_eq!(old.outcome, GroupOutcome::Cancelled);

        while coordinator.is_playing() {
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.played_keys(), vec!["q1.mp3", "hello"]);
        assert!(completions.try_recv().is_err());
    }
}
