use crate::backend::{PlaybackError, SoundTagPlayer};
use crate::tts::{ToneSynthesizer, TtsError, TtsPlayer, TtsRequest};
use futures::future::BoxFuture;
use futures::FutureExt;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::source::Source;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, StreamError};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LOG_TARGET: &str = "backend::audio";
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A minimal, poison-tolerant, lazy initializer for a single value.
///
/// [`rodio::OutputStream`] must outlive every sink connected to it; opening a
/// stream per tag makes rodio cut playback short when the stream is dropped.
struct LazyInit<T> {
    value: Mutex<Option<T>>,
}

impl<T> LazyInit<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    fn get_or_try_init_with<R, E>(
        &self,
        init: impl FnOnce() -> Result<T, E>,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R, E> {
        let mut guard = match self.value.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(target: LOG_TARGET, "output stream cache lock was poisoned; recovering");
                poisoned.into_inner()
            }
        };

        let value = match guard.take() {
            Some(v) => v,
            None => init()?,
        };
        let out = f(&value);
        *guard = Some(value);
        Ok(out)
    }
}

/// Plays media files and stand-in TTS tones through the system audio output.
///
/// Dropping a play future drops its sink, which silences the tag at once.
#[derive(Clone)]
pub struct RodioOutput {
    media_dir: PathBuf,
    output_device_name: Option<String>,
    output_stream: Arc<LazyInit<OutputStream>>,
    synth: ToneSynthesizer,
}

impl RodioOutput {
    pub fn new<P: Into<PathBuf>>(media_dir: P) -> Self {
        Self {
            media_dir: media_dir.into(),
            output_device_name: None,
            output_stream: Arc::new(LazyInit::new()),
            synth: ToneSynthesizer::default(),
        }
    }

    pub fn with_output_device_name<S: Into<String>>(mut self, name: S) -> Self {
        self.output_device_name = Some(name.into());
        self
    }

    fn open_output_stream(&self) -> Result<OutputStream, StreamError> {
        tracing::debug!(
            target: LOG_TARGET,
            configured_output_device = %self.output_device_name.as_deref().unwrap_or("<default>"),
            "opening rodio OutputStream"
        );

        if let Some(wanted) = self.output_device_name.as_deref() {
            match open_named_output_stream(wanted) {
                Ok(stream) => return Ok(stream),
                Err(details) => tracing::warn!(
                    target: LOG_TARGET,
                    wanted_device = %wanted,
                    %details,
                    "configured output device unusable; falling back to default output device"
                ),
            }
        }
        OutputStreamBuilder::open_default_stream()
    }

    fn connect_sink(&self) -> Result<Sink, PlaybackError> {
        self.output_stream
            .get_or_try_init_with(
                || self.open_output_stream(),
                |stream| Sink::connect_new(stream.mixer()),
            )
            // A busy or vanished device is usually transient, so the tag gets one more try.
            .map_err(|e| PlaybackError::retry(format!("audio output unavailable: {e}")))
    }

    fn open_media(&self, relative: &str) -> Result<Decoder<BufReader<File>>, PlaybackError> {
        let path = resolve_media_path(&self.media_dir, relative)
            .ok_or_else(|| PlaybackError::skip(format!("refusing media path outside media dir: {relative}")))?;
        let file = File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PlaybackError::skip(format!("{} not found", path.display())),
            _ => PlaybackError::skip(format!("cannot open {}: {e}", path.display())),
        })?;
        Decoder::new(BufReader::new(file))
            .map_err(|e| PlaybackError::skip(format!("cannot decode {}: {e}", path.display())))
    }
}

async fn drain(sink: &Sink) {
    while !sink.empty() {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}

impl SoundTagPlayer for RodioOutput {
    fn play_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), PlaybackError>> {
        async move {
            let source = self.open_media(path)?;
            let sink = self.connect_sink()?;
            tracing::debug!(target: LOG_TARGET, %path, "playing media file");
            sink.append(source);
            drain(&sink).await;
            Ok(())
        }
        .boxed()
    }
}

impl TtsPlayer for RodioOutput {
    fn speak(&self, request: TtsRequest) -> BoxFuture<'_, Result<(), TtsError>> {
        async move {
            let audio = self.synth.synthesize(&request);
            let sink = self
                .connect_sink()
                .map_err(|e| TtsError::Playback(e.to_string()))?;
            tracing::debug!(
                target: LOG_TARGET,
                language = %request.language,
                duration_ms = audio.duration_ms(),
                "speaking tts tone"
            );
            sink.append(PcmSource::new(audio.pcm_i16, audio.sample_rate_hz, audio.channels));
            drain(&sink).await;
            Ok(())
        }
        .boxed()
    }
}

/// Joins a tag's relative path onto the media directory, rejecting escapes.
fn resolve_media_path(media_dir: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        return None;
    }
    Some(media_dir.join(relative))
}

fn normalize_device_name(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

fn open_named_output_stream(wanted: &str) -> Result<OutputStream, String> {
    let wanted_norm = normalize_device_name(wanted);

    let host = rodio::cpal::default_host();
    let mut available: Vec<String> = Vec::new();
    let mut selected = None;

    if let Ok(devices) = host.output_devices() {
        for d in devices {
            let name = d.name().unwrap_or_else(|_| "<unnamed>".to_owned());
            if normalize_device_name(&name) == wanted_norm {
                selected = Some(d);
            }
            available.push(name);
        }
    }

    let Some(device) = selected else {
        return Err(format!(
            "device not found (available: {})",
            format_device_list(&available)
        ));
    };

    OutputStreamBuilder::from_device(device)
        .and_then(|b| b.open_stream_or_fallback())
        .map_err(|e| format!("open failed: {e}"))
}

fn format_device_list(devices: &[String]) -> String {
    if devices.is_empty() {
        return "<unknown>".to_owned();
    }
    devices.join(", ")
}

#[cfg(feature = "playback-device-enum")]
pub fn enumerate_output_device_names() -> Result<Vec<String>, PlaybackError> {
    let host = rodio::cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| PlaybackError::Other(format!("failed to list output devices: {e}")))?;

    Ok(devices
        .map(|d| d.name().unwrap_or_else(|_| "<unnamed>".to_owned()))
        .collect())
}

struct PcmSource {
    samples: std::vec::IntoIter<i16>,
    sample_rate: u32,
    channels: u16,
}

impl PcmSource {
    fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into_iter(),
            sample_rate,
            channels,
        }
    }
}

impl Iterator for PcmSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        self.samples.next().map(|s| s as f32 / i16::MAX as f32)
    }
}

impl Source for PcmSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
