//! Serialized speech output
//!
//! One worker task drains a FIFO of text items. Each item is stripped of
//! stage directions, synthesized and played while the worker holds
//! [`AudioOwner::Playback`]; the ownership guard is dropped on every exit path,
//! so a failed synthesis never leaves recording paused.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

use super::arbiter::{AudioArbiter, AudioOwner};
use super::playback::AudioSink;
use super::tts::SynthesisProvider;

/// Attempts to acquire playback ownership per item
const CLAIM_ATTEMPTS: u32 = 50;

/// Wait between playback ownership attempts
const CLAIM_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound on synthesizing one item, fallback providers included
pub const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(40);

/// Bracketed stage directions: ASCII and full-width parentheses, square and
/// lenticular brackets
static STAGE_DIRECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\([^()]*\)|\[[^\[\]]*\]|（[^（）]*）|【[^【】]*】").expect("valid regex")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Remove action/expression annotations, leaving only speakable text
///
/// Nested brackets are removed from the inside out. The result is trimmed with
/// whitespace runs collapsed, and applying it again changes nothing.
#[must_use]
pub fn strip_stage_directions(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = STAGE_DIRECTION.replace_all(&current, "").into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    WHITESPACE.replace_all(&current, " ").trim().to_string()
}

/// How a queued item ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Audio was synthesized and played to completion
    Played,
    /// Nothing speakable remained after stripping
    Skipped,
    /// Ownership, synthesis, or playback failed
    Failed,
    /// Removed by [`SpeechQueue::drain`] or queue shutdown
    Cancelled,
}

/// Completion handle for one queued item
#[derive(Debug)]
pub struct SpeechTicket {
    id: u64,
    rx: oneshot::Receiver<PlaybackOutcome>,
}

impl SpeechTicket {
    /// Queue-assigned sequence number
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the item to finish
    pub async fn wait(self) -> PlaybackOutcome {
        self.rx.await.unwrap_or(PlaybackOutcome::Cancelled)
    }
}

struct QueueItem {
    id: u64,
    text: String,
    done: oneshot::Sender<PlaybackOutcome>,
}

struct Inner {
    items: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
    next_id: AtomicU64,
    shutdown: AtomicBool,
    synthesizer: Arc<dyn SynthesisProvider>,
    synthesis_timeout: Duration,
    sink: Arc<dyn AudioSink>,
    arbiter: Arc<AudioArbiter>,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueueItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// FIFO speech output with a single playback worker
pub struct SpeechQueue {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechQueue {
    /// Start the queue worker on the current runtime
    #[must_use]
    pub fn start(
        synthesizer: Arc<dyn SynthesisProvider>,
        sink: Arc<dyn AudioSink>,
        arbiter: Arc<AudioArbiter>,
    ) -> Self {
        Self::start_with_timeout(synthesizer, sink, arbiter, DEFAULT_SYNTHESIS_TIMEOUT)
    }

    /// Start the queue worker, failing any item whose synthesis outlasts
    /// `synthesis_timeout`
    #[must_use]
    pub fn start_with_timeout(
        synthesizer: Arc<dyn SynthesisProvider>,
        sink: Arc<dyn AudioSink>,
        arbiter: Arc<AudioArbiter>,
        synthesis_timeout: Duration,
    ) -> Self {
        let inner = Arc::new(Inner {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            synthesizer,
            synthesis_timeout,
            sink,
            arbiter,
        });

        let worker = tokio::spawn(run_worker(Arc::clone(&inner)));

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue `text` behind everything already waiting
    pub fn enqueue(&self, text: impl Into<String>) -> SpeechTicket {
        self.push(text.into(), false)
    }

    /// Queue `text` ahead of everything waiting (the current item still finishes)
    pub fn enqueue_priority(&self, text: impl Into<String>) -> SpeechTicket {
        self.push(text.into(), true)
    }

    fn push(&self, text: String, front: bool) -> SpeechTicket {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (done, rx) = oneshot::channel();

        if self.inner.shutdown.load(Ordering::SeqCst) {
            let _ = done.send(PlaybackOutcome::Cancelled);
            return SpeechTicket { id, rx };
        }

        let item = QueueItem { id, text, done };
        {
            let mut items = self.inner.lock();
            if front {
                items.push_front(item);
            } else {
                items.push_back(item);
            }
            tracing::debug!(id, front, pending = items.len(), "speech queued");
        }
        self.inner.notify.notify_one();

        SpeechTicket { id, rx }
    }

    /// Cancel everything waiting; returns how many items were dropped
    pub fn drain(&self) -> usize {
        let drained: Vec<QueueItem> = self.inner.lock().drain(..).collect();
        let count = drained.len();
        for item in drained {
            let _ = item.done.send(PlaybackOutcome::Cancelled);
        }
        if count > 0 {
            tracing::debug!(count, "speech queue drained");
        }
        count
    }

    /// Items waiting (excluding the one playing)
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock().len()
    }

    /// Cancel pending items and stop the worker after its current item
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.drain();
        self.inner.notify.notify_one();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            tracing::error!(error = %e, "speech worker panicked");
        }
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }
}

async fn run_worker(inner: Arc<Inner>) {
    tracing::debug!("speech worker started");

    loop {
        let next = inner.lock().pop_front();
        let Some(item) = next else {
            if inner.shutdown.load(Ordering::SeqCst) {
                break;
            }
            inner.notify.notified().await;
            continue;
        };

        let outcome = speak(&inner, item.id, &item.text).await;
        tracing::debug!(id = item.id, ?outcome, "speech item finished");
        let _ = item.done.send(outcome);
    }

    tracing::debug!("speech worker stopped");
}

async fn speak(inner: &Inner, id: u64, text: &str) -> PlaybackOutcome {
    let speakable = strip_stage_directions(text);
    if speakable.is_empty() {
        tracing::debug!(id, "nothing speakable after stripping");
        return PlaybackOutcome::Skipped;
    }

    // Dropping the guard releases playback and resumes recording
    let guard = match inner
        .arbiter
        .claim(AudioOwner::Playback, CLAIM_ATTEMPTS, CLAIM_BACKOFF)
        .await
    {
        Ok(guard) => guard,
        Err(e) => {
            tracing::warn!(id, error = %e, "could not acquire audio for playback");
            return PlaybackOutcome::Failed;
        }
    };

    tracing::info!(id, text = %speakable, "speaking");

    let synthesized =
        tokio::time::timeout(inner.synthesis_timeout, inner.synthesizer.synthesize(&speakable))
            .await;
    let audio = match synthesized {
        Ok(Ok(audio)) => audio,
        Ok(Err(e)) => {
            tracing::warn!(id, error = %e, "speech synthesis failed");
            return PlaybackOutcome::Failed;
        }
        Err(_) => {
            tracing::warn!(id, timeout = ?inner.synthesis_timeout, "speech synthesis timed out");
            return PlaybackOutcome::Failed;
        }
    };

    let sink = Arc::clone(&inner.sink);
    let played = tokio::task::spawn_blocking(move || sink.play(&audio)).await;
    drop(guard);

    match played {
        Ok(Ok(())) => PlaybackOutcome::Played,
        Ok(Err(e)) => {
            tracing::warn!(id, error = %e, "playback failed");
            PlaybackOutcome::Failed
        }
        Err(e) => {
            tracing::error!(id, error = %e, "playback task panicked");
            PlaybackOutcome::Failed
        }
    }
}
