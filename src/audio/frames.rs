//! Frame assembly for the capture path
//!
//! Host callbacks deliver arbitrary block sizes, interleaved channels and the
//! device's native rate. These helpers turn that into fixed-size mono frames
//! at the session's input rate.

use rubato::{FftFixedIn, Resampler as _};

use super::AudioFrame;
use crate::{Error, Result};

/// Requested resampler input block size
const RESAMPLE_CHUNK: usize = 1024;

/// Collects samples into fixed-size frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    #[must_use]
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            frame_size: frame_size.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and return every frame completed by them, oldest first
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_size;
        if complete == 0 {
            return Vec::new();
        }

        let rest = self.pending.split_off(complete * self.frame_size);
        let full = std::mem::replace(&mut self.pending, rest);

        full.chunks_exact(self.frame_size)
            .map(|chunk| AudioFrame::new(chunk.to_vec(), self.sample_rate))
            .collect()
    }

    /// Samples waiting for the next frame
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Average interleaved channels down to mono
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streaming converter from the device rate to the session input rate
pub struct InputResampler {
    resampler: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl InputResampler {
    /// Create a mono resampler
    ///
    /// # Errors
    ///
    /// Returns error if the rate pair is not supported
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler =
            FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
                .map_err(|e| Error::AudioSetup(format!("resampler init failed: {e}")))?;

        Ok(Self {
            resampler,
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
        })
    }

    /// Feed mono samples and return whatever output is ready
    ///
    /// # Errors
    ///
    /// Returns error if the resampler rejects a block
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let chunk = self.resampler.input_frames_next();
        let mut output = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk {
            let block = &self.pending[consumed..consumed + chunk];
            let result = self
                .resampler
                .process(&[block], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            if let Some(channel) = result.first() {
                output.extend_from_slice(channel);
            }
            consumed += chunk;
        }
        self.pending.drain(..consumed);

        Ok(output)
    }
}
