use anyhow::Context;
use card_media_core::av::{AvTag, CardSide};
use card_media_core::backend::{
    LoggingErrorListener, MediaBackend, MediaErrorListener, ScriptedBackend, ScriptedOutcome,
};
use card_media_core::config::{
    resolve_optional_string, resolve_u64_with_default, Card, DeckId, DeckOptions, Env,
    InMemoryDeckConfigStore, OptionsGroupId, PlayerSettings, StdEnv, DEFAULT_TTS_INIT_TIMEOUT_MS,
    ENV_MEDIA_DIR, ENV_TTS_INIT_TIMEOUT_MS,
};
use card_media_core::coordinator::CardMediaCoordinator;
use card_media_core::render::InMemoryRenderer;
use card_media_core::sequencer::{PlaybackReport, PlaybackSequencer, TaskId};
use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

type Coordinator = CardMediaCoordinator<InMemoryRenderer, InMemoryDeckConfigStore>;

#[derive(Parser, Debug)]
#[command(name = "card-media")]
#[command(about = "Plays the sounds of flashcards side by side, as a reviewer would")]
struct Args {
    /// JSON file describing decks, cards and scripted backend behaviour.
    #[arg(long)]
    scenario: PathBuf,

    #[arg(long)]
    tts_timeout_ms: Option<u64>,

    /// Directory that `[sound:...]` paths are resolved against.
    #[arg(long)]
    media_dir: Option<String>,

    /// Play through the audio device instead of the scripted backend.
    #[arg(long, default_value_t = false)]
    audio: bool,

    #[arg(long)]
    output_device: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Deserialize, Debug)]
struct Scenario {
    #[serde(default)]
    options_groups: Vec<OptionsGroupSpec>,
    #[serde(default)]
    decks: Vec<DeckSpec>,
    cards: Vec<CardSpec>,
    #[serde(default)]
    backend: BackendSpec,
}

#[derive(Deserialize, Debug)]
struct OptionsGroupSpec {
    id: OptionsGroupId,
    #[serde(flatten)]
    options: DeckOptions,
}

#[derive(Deserialize, Debug)]
struct DeckSpec {
    id: DeckId,
    options_group: OptionsGroupId,
}

#[derive(Deserialize, Debug)]
struct CardSpec {
    #[serde(flatten)]
    card: Card,
    #[serde(default)]
    question: Vec<AvTag>,
    #[serde(default)]
    answer: Vec<AvTag>,
    /// Simulates the reviewer hiding a playing video this long after a side starts.
    #[serde(default)]
    pause_video_after_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
struct BackendSpec {
    #[serde(default)]
    default: ScriptedOutcome,
    #[serde(default)]
    latency_ms: u64,
    /// Outcomes per tag key, consumed in order; the last one sticks.
    #[serde(default)]
    outcomes: BTreeMap<String, Vec<ScriptedOutcome>>,
}

struct RunConfig {
    scenario: Scenario,
    settings: PlayerSettings,
    media_dir: Option<String>,
    audio: bool,
    output_device: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(args, &env)?;

    tracing::info!(
        cards = cfg.scenario.cards.len(),
        tts_init_timeout_ms = cfg.settings.tts_init_timeout_ms,
        audio = cfg.audio,
        media_dir = ?cfg.media_dir,
        output_device = ?cfg.output_device,
        "config loaded"
    );

    run(cfg).await
}

async fn run(cfg: RunConfig) -> anyhow::Result<()> {
    let backend = build_backend(&cfg)?;
    let sequencer = PlaybackSequencer::new(backend)
        .with_error_listener(Arc::new(LoggingErrorListener) as Arc<dyn MediaErrorListener>);

    let mut renderer = InMemoryRenderer::new();
    for spec in &cfg.scenario.cards {
        renderer = renderer.with_card(spec.card.id, spec.question.clone(), spec.answer.clone());
    }
    let coordinator = Coordinator::new(renderer, build_store(&cfg.scenario), sequencer);
    let mut completions = coordinator.subscribe();

    for spec in &cfg.scenario.cards {
        coordinator
            .load_card(&spec.card)
            .await
            .with_context(|| format!("failed to load card {}", spec.card.id))?;
        let pause_after = spec.pause_video_after_ms.map(Duration::from_millis);

        for side in [CardSide::Front, CardSide::Back] {
            match coordinator.autoplay_all_for_side(side).await {
                Some(task) => {
                    let report =
                        await_playback(&coordinator, &mut completions, task, pause_after).await?;
                    log_report(&report);
                }
                None => tracing::info!(card = %spec.card.id, ?side, "side shown without autoplay"),
            }
        }

        if coordinator.has_media(CardSide::Back).await {
            if let Some(task) = coordinator.replay_all(CardSide::Back).await {
                let report = await_playback(&coordinator, &mut completions, task, None).await?;
                log_report(&report);
            }
        }
    }

    coordinator.stop().await;
    Ok(())
}

/// Waits for `task` to complete, pausing its video after `pause_after` if given.
async fn await_playback(
    coordinator: &Coordinator,
    completions: &mut broadcast::Receiver<PlaybackReport>,
    task: TaskId,
    pause_after: Option<Duration>,
) -> anyhow::Result<PlaybackReport> {
    let wait = wait_for_report(completions, task);
    tokio::pin!(wait);
    if let Some(after) = pause_after {
        tokio::select! {
            report = &mut wait => return report,
            _ = tokio::time::sleep(after) => coordinator.on_video_paused(),
        }
    }
    wait.await
}

async fn wait_for_report(
    completions: &mut broadcast::Receiver<PlaybackReport>,
    task: TaskId,
) -> anyhow::Result<PlaybackReport> {
    loop {
        match completions.recv().await {
            Ok(report) if report.task == task => return Ok(report),
            Ok(report) => {
                tracing::debug!(task = %report.task, "completion of a superseded task")
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "missed completion reports")
            }
            Err(broadcast::error::RecvError::Closed) => {
                anyhow::bail!("completion channel closed while waiting for task {task}")
            }
        }
    }
}

fn log_report(report: &PlaybackReport) {
    tracing::info!(
        task = %report.task,
        side = ?report.side,
        outcome = ?report.outcome,
        attempted = report.tags_attempted,
        tags = report.tag_count,
        "playback completed"
    );
}

fn build_store(scenario: &Scenario) -> InMemoryDeckConfigStore {
    let mut store = InMemoryDeckConfigStore::default();
    for group in &scenario.options_groups {
        store = store.with_options_group(group.id, group.options);
    }
    for deck in &scenario.decks {
        store = store.with_deck(deck.id, deck.options_group);
    }
    store
}

fn scripted_backend(spec: &BackendSpec) -> ScriptedBackend {
    let mut backend = ScriptedBackend::new()
        .with_default(spec.default.clone())
        .with_latency(Duration::from_millis(spec.latency_ms));
    for (key, outcomes) in &spec.outcomes {
        let Some((last, queued)) = outcomes.split_last() else {
            continue;
        };
        backend = backend
            .with_sequence(key.clone(), queued.to_vec())
            .with_outcome(key.clone(), last.clone());
    }
    backend
}

#[cfg(feature = "audio-output")]
fn build_backend(cfg: &RunConfig) -> anyhow::Result<Arc<dyn MediaBackend>> {
    use card_media_core::backend::{AvTagRouter, RodioOutput};
    use card_media_core::tts::{DeferredTtsPlayer, TtsError};

    if !cfg.audio {
        return Ok(Arc::new(scripted_backend(&cfg.scenario.backend)));
    }
    let media_dir = cfg.media_dir.clone().unwrap_or_else(|| ".".to_owned());
    let mut output = RodioOutput::new(media_dir);
    if let Some(name) = &cfg.output_device {
        output = output.with_output_device_name(name.clone());
    }
    let engine = output.clone();
    let tts = DeferredTtsPlayer::spawn(
        async move { Ok::<_, TtsError>(engine) },
        cfg.settings.tts_init_timeout(),
    );
    Ok(Arc::new(AvTagRouter::new(output).with_tts(tts)))
}

#[cfg(not(feature = "audio-output"))]
fn build_backend(cfg: &RunConfig) -> anyhow::Result<Arc<dyn MediaBackend>> {
    if cfg.audio {
        anyhow::bail!("--audio requires a build with the audio-output feature");
    }
    Ok(Arc::new(scripted_backend(&cfg.scenario.backend)))
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn build_config(args: Args, env: &impl Env) -> anyhow::Result<RunConfig> {
    let raw = std::fs::read_to_string(&args.scenario)
        .with_context(|| format!("failed to read scenario {}", args.scenario.display()))?;
    let scenario = parse_scenario(&raw)
        .with_context(|| format!("invalid scenario {}", args.scenario.display()))?;

    let tts_timeout_ms = resolve_u64_with_default(
        args.tts_timeout_ms,
        ENV_TTS_INIT_TIMEOUT_MS,
        env,
        DEFAULT_TTS_INIT_TIMEOUT_MS,
    )?;

    Ok(RunConfig {
        scenario,
        settings: PlayerSettings::new(tts_timeout_ms)?,
        media_dir: resolve_optional_string(args.media_dir, ENV_MEDIA_DIR, env),
        audio: args.audio,
        output_device: args.output_device,
    })
}

fn parse_scenario(raw: &str) -> anyhow::Result<Scenario> {
    Ok(serde_json::from_str(raw)?)
}
