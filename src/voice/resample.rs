//! Sample rate conversion and fixed-size frame assembly

use rubato::{FftFixedIn, Resampler};

use super::capture::f32_to_i16;
use crate::{Error, Result};

/// Input chunk size fed to the FFT resampler
const CHUNK_SIZE: usize = 1024;

/// Sub-chunks per FFT chunk
const SUB_CHUNKS: usize = 2;

fn new_resampler(from_rate: u32, to_rate: u32) -> Result<FftFixedIn<f64>> {
    FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))
}

/// Resample a complete mono buffer
///
/// # Errors
///
/// Returns error if the resampler cannot be built for these rates
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let mut resampler = new_resampler(from_rate, to_rate)?;
    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::with_capacity(samples.len() * to_rate as usize / from_rate as usize + 1);

    // The resampler may round the chunk size up to suit the rate ratio
    let mut chunks = input.chunks_exact(resampler.input_frames_next());
    for chunk in &mut chunks {
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    let tail = [chunks.remainder()];
    if !tail[0].is_empty() {
        let result = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    Ok(output)
}

/// Turns arbitrary native-rate chunks into exact engine frames
///
/// Resamples from the device rate to the engine rate and buffers until a full
/// frame is available. Partial frames are never emitted.
pub struct FrameAssembler {
    resampler: Option<FftFixedIn<f64>>,
    pending_in: Vec<f64>,
    pending_out: Vec<i16>,
    frame_length: usize,
}

impl FrameAssembler {
    /// Create an assembler for `from_rate` input and `to_rate` frames
    ///
    /// # Errors
    ///
    /// Returns error if `frame_length` is zero or the resampler cannot be built
    pub fn new(from_rate: u32, to_rate: u32, frame_length: usize) -> Result<Self> {
        if frame_length == 0 {
            return Err(Error::WakeWord("frame length must be positive".to_string()));
        }

        let resampler = if from_rate == to_rate {
            None
        } else {
            tracing::debug!(from_rate, to_rate, "resampling wake word input");
            Some(new_resampler(from_rate, to_rate)?)
        };

        Ok(Self {
            resampler,
            pending_in: Vec::new(),
            pending_out: Vec::new(),
            frame_length,
        })
    }

    /// Feed samples, returning every frame that became complete
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<Vec<i16>>> {
        match &mut self.resampler {
            None => self
                .pending_out
                .extend(samples.iter().map(|&s| f32_to_i16(s))),
            Some(resampler) => {
                self.pending_in.extend(samples.iter().map(|&s| f64::from(s)));
                loop {
                    let needed = resampler.input_frames_next();
                    if self.pending_in.len() < needed {
                        break;
                    }
                    let chunk: Vec<f64> = self.pending_in.drain(..needed).collect();
                    let result = resampler
                        .process(&[chunk], None)
                        .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
                    self.pending_out
                        .extend(result[0].iter().map(|&s| f32_to_i16(s as f32)));
                }
            }
        }

        let complete = self.pending_out.len() / self.frame_length;
        let frames = self
            .pending_out
            .drain(..complete * self.frame_length)
            .collect::<Vec<_>>()
            .chunks_exact(self.frame_length)
            .map(<[i16]>::to_vec)
            .collect();
        Ok(frames)
    }

    /// Drop buffered audio, e.g. after a stream restart
    pub fn reset(&mut self) {
        self.pending_in.clear();
        self.pending_out.clear();
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
    }

    /// Samples waiting for the next frame
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.pending_out.len()
    }
}
