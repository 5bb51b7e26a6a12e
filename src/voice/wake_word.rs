//! Wake word detection engines
//!
//! An engine consumes fixed-size 16-bit frames at its own sample rate and
//! reports a keyword index on match. Vendor keyword spotters plug in behind
//! [`WakeWordEngine`]; [`EnergyWakeEngine`] is the built-in fallback.

use crate::{Error, Result};

/// Returned by [`WakeWordEngine::process`] when no keyword matched
pub const NO_DETECTION: i32 = -1;

/// A keyword spotting engine
pub trait WakeWordEngine: Send {
    /// Samples per frame the engine requires
    fn frame_length(&self) -> usize;

    /// Sample rate the engine requires
    fn sample_rate(&self) -> u32;

    /// Process one frame, returning a keyword index (>= 0) or [`NO_DETECTION`]
    ///
    /// # Errors
    ///
    /// Returns error if the frame is malformed or the engine fails
    fn process(&mut self, frame: &[i16]) -> Result<i32>;

    /// Clear internal state after a stream restart
    fn reset(&mut self) {}
}

/// Frame length of the built-in engine (32ms at 16kHz)
const ENERGY_FRAME_LENGTH: usize = 512;

/// Sample rate of the built-in engine
const ENERGY_SAMPLE_RATE: u32 = 16000;

/// Consecutive loud frames (~250ms) that count as a trigger
const DEBOUNCE_FRAMES: u32 = 8;

/// Quiet frames required before the engine can fire again
const REARM_FRAMES: u32 = 10;

/// Treats a sustained burst of loud audio as the wake phrase
///
/// Useful on hardware without a keyword spotter (e.g. a tap or clap to wake).
/// Higher sensitivity lowers the loudness threshold.
#[derive(Debug)]
pub struct EnergyWakeEngine {
    threshold: f32,
    loud_run: u32,
    quiet_run: u32,
    armed: bool,
}

impl EnergyWakeEngine {
    /// Create an engine for `sensitivity` in [0, 1]
    #[must_use]
    pub fn new(sensitivity: f32) -> Self {
        let sensitivity = sensitivity.clamp(0.0, 1.0);
        let threshold = 0.02 + (1.0 - sensitivity) * 0.18;
        tracing::debug!(sensitivity, threshold, "energy wake engine initialized");

        Self {
            threshold,
            loud_run: 0,
            quiet_run: 0,
            armed: true,
        }
    }

    /// RMS threshold in use
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl WakeWordEngine for EnergyWakeEngine {
    fn frame_length(&self) -> usize {
        ENERGY_FRAME_LENGTH
    }

    fn sample_rate(&self) -> u32 {
        ENERGY_SAMPLE_RATE
    }

    #[allow(clippy::cast_precision_loss)]
    fn process(&mut self, frame: &[i16]) -> Result<i32> {
        if frame.len() != ENERGY_FRAME_LENGTH {
            return Err(Error::WakeWord(format!(
                "expected {ENERGY_FRAME_LENGTH} samples, got {}",
                frame.len()
            )));
        }

        let sum_squares: f32 = frame
            .iter()
            .map(|&s| {
                let v = f32::from(s) / 32768.0;
                v * v
            })
            .sum();
        let rms = (sum_squares / frame.len() as f32).sqrt();

        if rms > self.threshold {
            self.quiet_run = 0;
            self.loud_run += 1;
            if self.armed && self.loud_run >= DEBOUNCE_FRAMES {
                self.armed = false;
                return Ok(0);
            }
        } else {
            self.loud_run = 0;
            self.quiet_run += 1;
            if self.quiet_run >= REARM_FRAMES {
                self.armed = true;
            }
        }

        Ok(NO_DETECTION)
    }

    fn reset(&mut self) {
        self.loud_run = 0;
        self.quiet_run = 0;
        self.armed = true;
    }
}
