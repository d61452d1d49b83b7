//! Audio primitives and the host audio capability
//!
//! The pipeline never talks to a sound card directly. It asks an
//! [`AudioBackend`] for an [`AudioInput`] (microphone) and an [`AudioOutput`]
//! (speaker with its own clock), so the same capture and playback code runs
//! against `cpal` in the binary and against scripted devices in tests.

mod device;
mod frames;
mod pcm;

use tokio::sync::mpsc;

pub use device::{CpalBackend, DeviceInfo, DeviceKind, list_devices};
pub use frames::{FrameAssembler, InputResampler, downmix};
pub use pcm::{DecodeError, INPUT_MIME_TYPE, decode_fragment, encode_frame, write_wav};

use crate::Result;

/// Sample rate of captured microphone audio (16kHz for speech)
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized model audio
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per captured frame
pub const FRAME_SIZE: usize = 4096;

/// Handle of one scheduled playback source
pub type SourceId = u64;

/// One block of captured mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

/// Encoded microphone audio ready for a single send
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedBlob {
    /// Base64 of little-endian 16-bit PCM
    pub data: String,
    /// Format tag, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

/// Decoded, playable mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudioBuffer {
    /// Playback length in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Microphone capture settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    /// Frames buffered between the audio thread and the pipeline
    pub channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            frame_size: FRAME_SIZE,
            channel_capacity: 16,
        }
    }
}

/// Host audio capability: creates microphone and speaker handles
pub trait AudioBackend {
    /// Acquire the microphone and start delivering frames of
    /// `config.frame_size` samples at `config.sample_rate`.
    ///
    /// Implementations must never block the audio thread on `frames`; a full
    /// channel drops the frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MicrophoneAccess`] if no device is available or
    /// access is denied
    fn open_input(
        &self,
        config: &CaptureConfig,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Box<dyn AudioInput>>;

    /// Open the speaker at `sample_rate` with a shared output gain stage.
    ///
    /// Every source that plays to completion is reported once on `ended`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AudioSetup`] if the output cannot be opened
    fn open_output(
        &self,
        sample_rate: u32,
        gain: f32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioOutput>>;
}

/// A running microphone stream
pub trait AudioInput {
    /// Stop the processing callback and release the device. Idempotent.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// A speaker with a monotonic clock and scheduled sources
pub trait AudioOutput {
    /// Output clock in seconds since the output was opened
    fn current_time(&self) -> f64;

    fn sample_rate(&self) -> u32;

    /// Schedule `buffer` to begin at `start_at` seconds on the output clock
    ///
    /// # Errors
    ///
    /// Returns error if the output is closed or rejects the source
    fn start_source(&mut self, id: SourceId, buffer: DecodedAudioBuffer, start_at: f64)
    -> Result<()>;

    /// Stop a source immediately. Unknown ids are ignored and no ended
    /// notification is sent for a stopped source.
    fn stop_source(&mut self, id: SourceId);

    /// Stop everything and release the device. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
