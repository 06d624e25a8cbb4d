use crate::tts::{TtsError, TtsPlayer};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const LOG_TARGET: &str = "tts::deferred";

type InitFuture = Shared<BoxFuture<'static, Result<Arc<dyn TtsPlayer>, TtsError>>>;

/// A TTS engine that starts in the background and is awaited on first use.
///
/// Engine start-up can take seconds, so it begins as soon as this is built
/// and each `get` waits at most `timeout` for it.
#[derive(Clone)]
pub struct DeferredTtsPlayer {
    init: InitFuture,
    timeout: Duration,
}

impl DeferredTtsPlayer {
    /// Spawns `init` on the current Tokio runtime.
    pub fn spawn<F, P>(init: F, timeout: Duration) -> Self
    where
        F: Future<Output = Result<P, TtsError>> + Send + 'static,
        P: TtsPlayer + 'static,
    {
        let handle = tokio::spawn(init);
        let init = async move {
            match handle.await {
                Ok(Ok(player)) => {
                    tracing::debug!(target: LOG_TARGET, "tts engine ready");
                    Ok(Arc::new(player) as Arc<dyn TtsPlayer>)
                }
                Ok(Err(e)) => Err(e),
                Err(e) => Err(TtsError::InitFailed(e.to_string())),
            }
        }
        .boxed()
        .shared();
        Self { init, timeout }
    }

    pub async fn get(&self) -> Result<Arc<dyn TtsPlayer>, TtsError> {
        match tokio::time::timeout(self.timeout, self.init.clone()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(target: LOG_TARGET, timeout_ms = self.timeout.as_millis() as u64, "timeout waiting for tts engine");
                Err(TtsError::InitTimeout)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.init.peek(), Some(Ok(_)))
    }
}
