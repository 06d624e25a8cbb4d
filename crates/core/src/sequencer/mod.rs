mod policy;

use crate::av::{AvTag, Side, SoundGroup};
use crate::backend::{MediaBackend, MediaErrorListener, PlaybackError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use policy::{action_after_failure, TagAction};

const LOG_TARGET: &str = "sequencer";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a group execution ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Every tag was attempted.
    Finished,
    /// A tag failed with `StopAudio`; the remaining tags were not attempted.
    Stopped,
    /// The task was cancelled before the group was exhausted.
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackReport {
    pub task: TaskId,
    /// `None` for single-tag playback.
    pub side: Option<Side>,
    pub outcome: GroupOutcome,
    /// Tags whose playback was started. A retry does not count twice.
    pub tags_attempted: usize,
    pub tag_count: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum SequencerError {
    #[error("playback task {task} did not run to completion: {details}")]
    TaskFailed { task: TaskId, details: String },
}

pub(crate) type CompletionCallback = Box<dyn FnOnce(PlaybackReport) + Send>;
type Injected = Result<(), PlaybackError>;

/// Owns a task's completion callback and fires it exactly once.
///
/// If the task is torn down without reaching the end (runtime shutdown, panic
/// in the backend) the callback still fires from `Drop`, as `Cancelled`.
struct Completion {
    callback: Option<CompletionCallback>,
    report: PlaybackReport,
}

impl Completion {
    fn fire(mut self, outcome: GroupOutcome) -> PlaybackReport {
        self.report.outcome = outcome;
        if let Some(callback) = self.callback.take() {
            callback(self.report);
        }
        self.report
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            self.report.outcome = GroupOutcome::Cancelled;
            callback(self.report);
        }
    }
}

/// Slot through which an external producer resolves the in-flight `play` call.
#[derive(Default)]
struct TagSignal {
    slot: Mutex<Option<(u64, oneshot::Sender<Injected>)>>,
    next: AtomicU64,
}

impl TagSignal {
    fn lock(&self) -> MutexGuard<'_, Option<(u64, oneshot::Sender<Injected>)>> {
        match self.slot.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn arm(&self) -> (u64, oneshot::Receiver<Injected>) {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        *self.lock() = Some((id, tx));
        (id, rx)
    }

    fn disarm(&self, id: u64) {
        let mut slot = self.lock();
        if matches!(slot.as_ref(), Some((armed, _)) if *armed == id) {
            *slot = None;
        }
    }

    fn send(&self, injected: Injected) -> bool {
        match self.lock().take() {
            Some((_, tx)) => tx.send(injected).is_ok(),
            None => false,
        }
    }
}

enum TagFlow {
    Next,
    Stop,
    Cancelled,
}

enum Attempt {
    Cancelled,
    Injected(Injected),
    Backend(Injected),
}

struct Shared {
    backend: Arc<dyn MediaBackend>,
    listener: Option<Arc<dyn MediaErrorListener>>,
    signal: TagSignal,
}

impl Shared {
    /// One `play` call. `None` when the task was cancelled while waiting.
    async fn attempt(&self, tag: &AvTag, token: &CancellationToken) -> Option<Injected> {
        if token.is_cancelled() {
            return None;
        }
        let (signal_id, mut injected) = self.signal.arm();
        let attempt = tokio::select! {
            biased;
            _ = token.cancelled() => Attempt::Cancelled,
            Ok(result) = &mut injected => Attempt::Injected(result),
            result = self.backend.play(tag) => Attempt::Backend(result),
        };
        self.signal.disarm(signal_id);
        match attempt {
            Attempt::Cancelled => None,
            Attempt::Injected(result) => Some(result),
            // A signal that took the slot before the disarm still wins.
            Attempt::Backend(result) => Some(injected.try_recv().unwrap_or(result)),
        }
    }

    fn notify(&self, tag: &AvTag, error: &PlaybackError) {
        if let Some(listener) = &self.listener {
            listener.on_error(tag, error);
        }
    }

    async fn play_tag(&self, task: TaskId, tag: &AvTag, token: &CancellationToken) -> TagFlow {
        let error = match self.attempt(tag, token).await {
            None => return TagFlow::Cancelled,
            Some(Ok(())) => return TagFlow::Next,
            Some(Err(e)) => e,
        };
        self.notify(tag, &error);

        match action_after_failure(&error) {
            TagAction::Advance => {
                if error.behavior().is_none() {
                    tracing::warn!(target: LOG_TARGET, %task, %tag, error = %error, "unexpected media error; continuing");
                }
                TagFlow::Next
            }
            TagAction::StopGroup => {
                tracing::debug!(target: LOG_TARGET, %task, "stopping AV tag playback early");
                TagFlow::Stop
            }
            TagAction::RetryOnce => {
                tracing::info!(target: LOG_TARGET, %task, %tag, "retrying media");
                match self.attempt(tag, token).await {
                    None => TagFlow::Cancelled,
                    Some(Ok(())) => {
                        tracing::info!(target: LOG_TARGET, %task, "retry succeeded");
                        TagFlow::Next
                    }
                    // Whatever the retry reports, the tag is done.
                    Some(Err(e)) => {
                        tracing::warn!(target: LOG_TARGET, %task, error = %e, "retry media failed");
                        self.notify(tag, &e);
                        TagFlow::Next
                    }
                }
            }
        }
    }
}

async fn run_group(
    shared: Arc<Shared>,
    tags: Vec<AvTag>,
    token: CancellationToken,
    mut completion: Completion,
) -> PlaybackReport {
    let task = completion.report.task;
    let total = tags.len();
    let mut outcome = GroupOutcome::Finished;

    for (index, tag) in tags.iter().enumerate() {
        if token.is_cancelled() {
            outcome = GroupOutcome::Cancelled;
            break;
        }
        tracing::debug!(target: LOG_TARGET, %task, "playing AV tag {}/{}", index + 1, total);
        completion.report.tags_attempted += 1;
        match shared.play_tag(task, tag, &token).await {
            TagFlow::Next => {}
            TagFlow::Stop => {
                outcome = GroupOutcome::Stopped;
                break;
            }
            TagFlow::Cancelled => {
                outcome = GroupOutcome::Cancelled;
                break;
            }
        }
    }

    let report = completion.fire(outcome);
    tracing::debug!(target: LOG_TARGET, %task, outcome = ?report.outcome, attempted = report.tags_attempted, "AV tag group completed");
    report
}

/// Handle to one in-flight group execution.
#[derive(Debug)]
pub struct PlaybackTask {
    id: TaskId,
    side: Option<Side>,
    token: CancellationToken,
    handle: JoinHandle<PlaybackReport>,
}

impl PlaybackTask {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn side(&self) -> Option<Side> {
        self.side
    }

    /// No further tags are attempted; the completion callback still fires.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Result<PlaybackReport, SequencerError> {
        let task = self.id;
        self.handle
            .await
            .map_err(|e| SequencerError::TaskFailed {
                task,
                details: e.to_string(),
            })
    }

    pub async fn cancel_and_join(self) -> Result<PlaybackReport, SequencerError> {
        self.cancel();
        self.join().await
    }
}

/// Plays the tags of a group one at a time through a [`MediaBackend`].
///
/// Tasks are spawned on the current Tokio runtime.
#[derive(Clone)]
pub struct PlaybackSequencer {
    shared: Arc<Shared>,
    next_task: Arc<AtomicU64>,
}

impl PlaybackSequencer {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                listener: None,
                signal: TagSignal::default(),
            }),
            next_task: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_error_listener(self, listener: Arc<dyn MediaErrorListener>) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend: Arc::clone(&self.shared.backend),
                listener: Some(listener),
                signal: TagSignal::default(),
            }),
            next_task: self.next_task,
        }
    }

    /// Plays every tag of `group` in order; `on_complete` fires exactly once.
    pub fn play_group<F>(&self, group: SoundGroup, on_complete: F) -> PlaybackTask
    where
        F: FnOnce(PlaybackReport) + Send + 'static,
    {
        let side = group.side();
        self.spawn_tags(Some(side), group.into_tags(), Some(Box::new(on_complete)))
    }

    /// Plays one tag with the same retry policy and no completion callback.
    pub fn play_single(&self, tag: AvTag) -> PlaybackTask {
        self.spawn_tags(None, vec![tag], None)
    }

    pub fn cancel(&self, task: &PlaybackTask) {
        tracing::info!(target: LOG_TARGET, task = %task.id, "cancelling playback task");
        task.cancel();
    }

    /// Resolves the in-flight `play` call with `injected` instead of the backend's result.
    ///
    /// Returns false when no tag is in flight.
    pub fn resolve_current_tag(&self, injected: Result<(), PlaybackError>) -> bool {
        self.shared.signal.send(injected)
    }

    /// Spawns a task over `tags`; `callback`, if any, fires exactly once.
    pub(crate) fn spawn_tags(
        &self,
        side: Option<Side>,
        tags: Vec<AvTag>,
        callback: Option<CompletionCallback>,
    ) -> PlaybackTask {
        let id = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
        let token = CancellationToken::new();
        let completion = Completion {
            callback,
            report: PlaybackReport {
                task: id,
                side,
                outcome: GroupOutcome::Finished,
                tags_attempted: 0,
                tag_count: tags.len(),
            },
        };
        tracing::info!(target: LOG_TARGET, task = %id, side = ?side, tags = tags.len(), "starting playback task");
        let handle = tokio::spawn(run_group(
            Arc::clone(&self.shared),
            tags,
            token.clone(),
            completion,
        ));
        PlaybackTask {
            id,
            side,
            token,
            handle,
        }
    }
}
