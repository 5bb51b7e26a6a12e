//! Audio device arbitration
//!
//! A single microphone/speaker pair is shared between wake word listening,
//! utterance capture, and speech playback. Only one of them may own the device
//! at any instant; every transition goes through [`AudioArbiter`].
//!
//! Owning [`AudioOwner::Playback`] also marks recording as paused, which is
//! what capture and recognition consult to avoid transcribing our own voice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::{Error, Result};

/// Capacity of the ownership event channel
const EVENT_CAPACITY: usize = 64;

/// Current holder of the audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AudioOwner {
    /// Device is free
    #[default]
    None,
    /// Wake word listener is reading frames
    WakeDetector,
    /// Utterance capture is recording
    Capture,
    /// Speech synthesis output is playing
    Playback,
}

impl AudioOwner {
    /// Short name used in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::WakeDetector => "wake_detector",
            Self::Capture => "capture",
            Self::Playback => "playback",
        }
    }
}

impl std::fmt::Display for AudioOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ownership transition, published in the order it happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipEvent {
    /// `owner` took the device
    Acquired(AudioOwner),
    /// `owner` gave the device back
    Released(AudioOwner),
}

/// Guarded single-owner audio device state
#[derive(Debug)]
pub struct AudioArbiter {
    owner: Mutex<AudioOwner>,
    recording_paused: AtomicBool,
    events: broadcast::Sender<OwnershipEvent>,
}

impl Default for AudioArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioArbiter {
    /// Create a new arbiter with no owner
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            owner: Mutex::new(AudioOwner::None),
            recording_paused: AtomicBool::new(false),
            events,
        }
    }

    /// Try to take the device for `owner`
    ///
    /// Returns `false` without blocking if a different owner holds it.
    /// Re-acquiring by the current owner succeeds.
    pub fn acquire(&self, owner: AudioOwner) -> bool {
        if owner == AudioOwner::None {
            return false;
        }

        let mut current = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == owner {
            return true;
        }
        if *current != AudioOwner::None {
            tracing::trace!(requested = %owner, held_by = %*current, "audio acquire refused");
            return false;
        }

        *current = owner;
        if owner == AudioOwner::Playback {
            self.recording_paused.store(true, Ordering::SeqCst);
            tracing::debug!("recording paused for playback");
        }
        let _ = self.events.send(OwnershipEvent::Acquired(owner));
        tracing::debug!(owner = %owner, "audio acquired");
        true
    }

    /// Give the device back
    ///
    /// Ignored (with a warning) if `owner` is not the current holder.
    pub fn release(&self, owner: AudioOwner) {
        let mut current = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != owner || owner == AudioOwner::None {
            if owner != AudioOwner::None {
                tracing::warn!(requested = %owner, held_by = %*current, "release by non-owner ignored");
            }
            return;
        }

        *current = AudioOwner::None;
        if owner == AudioOwner::Playback {
            self.recording_paused.store(false, Ordering::SeqCst);
            tracing::debug!("recording resumed");
        }
        let _ = self.events.send(OwnershipEvent::Released(owner));
        tracing::debug!(owner = %owner, "audio released");
    }

    /// Release whatever is held, returning the previous owner
    pub fn force_release(&self) -> AudioOwner {
        let previous = self.current();
        if previous != AudioOwner::None {
            tracing::warn!(owner = %previous, "forcing audio release");
            self.release(previous);
        }
        previous
    }

    /// Current owner
    #[must_use]
    pub fn current(&self) -> AudioOwner {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether speech output currently owns the device
    #[must_use]
    pub fn is_playing_audio(&self) -> bool {
        self.current() == AudioOwner::Playback
    }

    /// Whether recording is paused for playback
    #[must_use]
    pub fn is_recording_paused(&self) -> bool {
        self.recording_paused.load(Ordering::SeqCst)
    }

    /// Subscribe to ownership transitions
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OwnershipEvent> {
        self.events.subscribe()
    }

    /// Acquire and wrap the ownership in a guard that releases on drop
    #[must_use]
    pub fn try_claim(self: &Arc<Self>, owner: AudioOwner) -> Option<OwnershipGuard> {
        self.acquire(owner).then(|| OwnershipGuard {
            arbiter: Arc::clone(self),
            owner,
            released: false,
        })
    }

    /// Acquire with bounded retries, sleeping `backoff` between attempts
    ///
    /// # Errors
    ///
    /// Returns [`Error::AudioBusy`] if the device is still held by another
    /// owner after all attempts
    pub async fn claim(
        self: &Arc<Self>,
        owner: AudioOwner,
        attempts: u32,
        backoff: Duration,
    ) -> Result<OwnershipGuard> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(guard) = self.try_claim(owner) {
                return Ok(guard);
            }
            if attempt < attempts {
                tracing::debug!(owner = %owner, attempt, "audio busy, retrying");
                tokio::time::sleep(backoff).await;
            }
        }

        Err(Error::AudioBusy(format!(
            "{owner} could not acquire device held by {}",
            self.current()
        )))
    }
}

/// Scoped audio ownership; releases on drop
#[derive(Debug)]
pub struct OwnershipGuard {
    arbiter: Arc<AudioArbiter>,
    owner: AudioOwner,
    released: bool,
}

impl OwnershipGuard {
    /// The owner this guard holds the device for
    #[must_use]
    pub const fn owner(&self) -> AudioOwner {
        self.owner
    }

    /// Release explicitly
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.arbiter.release(self.owner);
        }
    }
}

impl Drop for OwnershipGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
