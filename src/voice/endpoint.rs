//! Utterance capture with energy endpointing

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::arbiter::{AudioArbiter, AudioOwner};
use super::capture::{AudioCapture, SPEECH_SAMPLE_RATE, rms_energy, samples_to_wav};
use super::resample::resample;
use crate::{Error, Result};

/// RMS level above which a chunk counts as speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Trailing silence that ends an utterance
const END_SILENCE: Duration = Duration::from_millis(500);

/// Minimum speech length for an utterance to count
const MIN_SPEECH: Duration = Duration::from_millis(300);

/// How often the capture thread drains the device buffer
const POLL_INTERVAL: Duration = Duration::from_millis(30);

/// One captured span of user speech
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Mono PCM samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
    /// When capture finished
    pub captured_at: DateTime<Utc>,
}

impl Utterance {
    /// Create an utterance stamped with the current time
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            captured_at: Utc::now(),
        }
    }

    /// Length of the recording
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Encode as 16-bit mono WAV at the speech sample rate
    ///
    /// # Errors
    ///
    /// Returns error if resampling or encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let samples = resample(&self.samples, self.sample_rate, SPEECH_SAMPLE_RATE)?;
        samples_to_wav(&samples, SPEECH_SAMPLE_RATE)
    }
}

/// Something that can record one utterance
#[async_trait]
pub trait UtteranceSource: Send + Sync {
    /// Record until end of speech
    ///
    /// Waits up to `listen_timeout` for speech to begin and stops after
    /// `phrase_limit` of speech. Returns `Ok(None)` when nobody spoke.
    async fn capture(
        &self,
        listen_timeout: Duration,
        phrase_limit: Duration,
    ) -> Result<Option<Utterance>>;
}

/// Progress of an [`Endpointer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    /// No speech yet
    Waiting,
    /// Speech in progress
    Speaking,
    /// Speech followed by enough silence, or phrase limit reached
    Complete,
    /// Listen timeout passed without speech
    NoSpeech,
}

/// Energy based start/end of speech detection over a sample stream
#[derive(Debug)]
pub struct Endpointer {
    sample_rate: u32,
    listen_limit: usize,
    phrase_limit: usize,
    end_silence: usize,
    min_speech: usize,
    waited: usize,
    speech: Vec<f32>,
    silence_run: usize,
    status: EndpointStatus,
}

impl Endpointer {
    /// Create an endpointer for audio at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32, listen_timeout: Duration, phrase_limit: Duration) -> Self {
        Self {
            sample_rate,
            listen_limit: samples_for(sample_rate, listen_timeout),
            phrase_limit: samples_for(sample_rate, phrase_limit),
            end_silence: samples_for(sample_rate, END_SILENCE),
            min_speech: samples_for(sample_rate, MIN_SPEECH),
            waited: 0,
            speech: Vec::new(),
            silence_run: 0,
            status: EndpointStatus::Waiting,
        }
    }

    /// Feed the next chunk of samples
    pub fn push(&mut self, chunk: &[f32]) -> EndpointStatus {
        if chunk.is_empty() {
            return self.status;
        }
        let is_speech = rms_energy(chunk) > ENERGY_THRESHOLD;

        match self.status {
            EndpointStatus::Waiting => {
                if is_speech {
                    self.status = EndpointStatus::Speaking;
                    self.speech.extend_from_slice(chunk);
                    self.silence_run = 0;
                    tracing::trace!("speech onset");
                } else {
                    self.waited += chunk.len();
                    if self.waited >= self.listen_limit {
                        self.status = EndpointStatus::NoSpeech;
                    }
                }
            }
            EndpointStatus::Speaking => {
                self.speech.extend_from_slice(chunk);
                if is_speech {
                    self.silence_run = 0;
                } else {
                    self.silence_run += chunk.len();
                }

                let voiced = self.speech.len().saturating_sub(self.silence_run);
                if self.speech.len() >= self.phrase_limit {
                    tracing::debug!("phrase time limit reached");
                    self.status = EndpointStatus::Complete;
                } else if self.silence_run >= self.end_silence {
                    if voiced >= self.min_speech {
                        self.status = EndpointStatus::Complete;
                    } else {
                        // Too short to be speech; keep waiting
                        tracing::trace!(voiced, "discarding short noise burst");
                        self.waited += self.speech.len();
                        self.speech.clear();
                        self.silence_run = 0;
                        self.status = if self.waited >= self.listen_limit {
                            EndpointStatus::NoSpeech
                        } else {
                            EndpointStatus::Waiting
                        };
                    }
                }
            }
            EndpointStatus::Complete | EndpointStatus::NoSpeech => {}
        }

        self.status
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> EndpointStatus {
        self.status
    }

    /// Consume into an utterance if speech was captured
    #[must_use]
    pub fn finish(self) -> Option<Utterance> {
        match self.status {
            EndpointStatus::Complete => Some(Utterance::new(self.speech, self.sample_rate)),
            // Cut off by the caller mid-speech
            EndpointStatus::Speaking
                if self.speech.len().saturating_sub(self.silence_run) >= self.min_speech =>
            {
                Some(Utterance::new(self.speech, self.sample_rate))
            }
            _ => None,
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn samples_for(sample_rate: u32, duration: Duration) -> usize {
    (f64::from(sample_rate) * duration.as_secs_f64()) as usize
}

/// Records utterances from the default microphone
///
/// Each capture opens the device on a blocking thread, so the device is only
/// held while the orchestrator owns [`AudioOwner::Capture`].
pub struct MicrophoneCapture {
    arbiter: Arc<AudioArbiter>,
}

impl MicrophoneCapture {
    /// Create a microphone capture bound to the shared arbiter
    #[must_use]
    pub const fn new(arbiter: Arc<AudioArbiter>) -> Self {
        Self { arbiter }
    }
}

#[async_trait]
impl UtteranceSource for MicrophoneCapture {
    async fn capture(
        &self,
        listen_timeout: Duration,
        phrase_limit: Duration,
    ) -> Result<Option<Utterance>> {
        if self.arbiter.is_playing_audio() {
            tracing::debug!("playback active, skipping capture");
            return Ok(None);
        }

        let arbiter = Arc::clone(&self.arbiter);
        tokio::task::spawn_blocking(move || record_blocking(&arbiter, listen_timeout, phrase_limit))
            .await
            .map_err(|e| Error::Audio(format!("capture task failed: {e}")))?
    }
}

fn record_blocking(
    arbiter: &AudioArbiter,
    listen_timeout: Duration,
    phrase_limit: Duration,
) -> Result<Option<Utterance>> {
    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let mut endpointer = Endpointer::new(capture.sample_rate(), listen_timeout, phrase_limit);
    let deadline = std::time::Instant::now() + listen_timeout + phrase_limit;

    loop {
        std::thread::sleep(POLL_INTERVAL);

        // Ownership was taken away (stop or forced release)
        if arbiter.current() != AudioOwner::Capture || arbiter.is_recording_paused() {
            tracing::debug!("capture ownership lost, aborting");
            capture.stop();
            return Ok(None);
        }

        let status = endpointer.push(&capture.take_buffer());
        if matches!(status, EndpointStatus::Complete | EndpointStatus::NoSpeech)
            || std::time::Instant::now() >= deadline
        {
            break;
        }
    }

    capture.stop();
    let utterance = endpointer.finish();
    if let Some(u) = &utterance {
        tracing::debug!(duration_ms = u.duration().as_millis(), "utterance captured");
    }
    Ok(utterance)
}
