//! 16-bit PCM wire codec
//!
//! Microphone frames go out as base64 little-endian `i16` at 16kHz; model
//! audio comes back in the same layout at 24kHz.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use std::path::Path;

use super::{DecodedAudioBuffer, EncodedBlob};
use crate::Error;

/// MIME tag attached to every outgoing frame
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Signed 16-bit magnitude used for both directions
const I16_SCALE: f32 = 32768.0;

/// Malformed incoming audio
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("odd PCM byte length {0}")]
    OddLength(usize),
}

/// Encode one captured frame for the session
///
/// Infinite samples clamp to the nearest bound and NaN encodes as silence.
#[must_use]
pub fn encode_frame(samples: &[f32]) -> EncodedBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }

    EncodedBlob {
        data: STANDARD.encode(bytes),
        mime_type: INPUT_MIME_TYPE.to_string(),
    }
}

/// Decode a base64 PCM fragment into a playable buffer at `sample_rate`
///
/// # Errors
///
/// Returns error if the payload is not base64 or not a whole number of samples
pub fn decode_fragment(data: &str, sample_rate: u32) -> Result<DecodedAudioBuffer, DecodeError> {
    let bytes = STANDARD.decode(data.trim())?;
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / I16_SCALE)
        .collect();

    Ok(DecodedAudioBuffer {
        samples,
        sample_rate,
    })
}

/// Write mono samples as a 16-bit WAV file
///
/// # Errors
///
/// Returns error if the file cannot be created or written
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> crate::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| Error::Audio(e.to_string()))?;
    for &sample in samples {
        writer
            .write_sample(quantize(sample))
            .map_err(|e| Error::Audio(e.to_string()))?;
    }
    writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;

    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let scaled = (sample.clamp(-1.0, 1.0) * I16_SCALE).round();
    scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}
