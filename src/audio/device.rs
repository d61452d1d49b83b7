//! `cpal` implementation of the host audio capability

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};
use cpal::Sample as _;
use tokio::sync::mpsc;

use super::frames::{FrameAssembler, InputResampler, downmix};
use super::{
    AudioBackend, AudioFrame, AudioInput, AudioOutput, CaptureConfig, DecodedAudioBuffer,
    SourceId,
};
use crate::{Error, Result};

/// Audio backed by the default `cpal` host devices
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(
        &self,
        config: &CaptureConfig,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Box<dyn AudioInput>> {
        CpalInput::open(config, frames).map(|input| Box::new(input) as Box<dyn AudioInput>)
    }

    fn open_output(
        &self,
        sample_rate: u32,
        gain: f32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioOutput>> {
        CpalOutput::open(sample_rate, gain, ended).map(|output| Box::new(output) as Box<dyn AudioOutput>)
    }
}

/// Sample formats both stream directions can convert to and from `f32`
const fn is_supported_format(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::F32 | SampleFormat::I16 | SampleFormat::I32 | SampleFormat::U16
    )
}

/// Microphone stream delivering fixed-size frames
struct CpalInput {
    stream: Option<Stream>,
}

impl CpalInput {
    fn open(config: &CaptureConfig, frames: mpsc::Sender<AudioFrame>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::MicrophoneAccess("no input device available".to_string()))?;

        // Prefer a native mono stream at the session rate, otherwise convert
        let native = device
            .supported_input_configs()
            .map_err(|e| Error::MicrophoneAccess(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && is_supported_format(c.sample_format())
                    && c.min_sample_rate() <= SampleRate(config.sample_rate)
                    && c.max_sample_rate() >= SampleRate(config.sample_rate)
            })
            .map(|c| c.with_sample_rate(SampleRate(config.sample_rate)));

        let supported = match native {
            Some(c) => c,
            None => device
                .default_input_config()
                .map_err(|e| Error::MicrophoneAccess(e.to_string()))?,
        };

        let sample_format = supported.sample_format();
        let stream_config: StreamConfig = supported.config();
        let device_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels;

        let mut resampler = if device_rate == config.sample_rate {
            None
        } else {
            Some(InputResampler::new(device_rate, config.sample_rate)?)
        };
        let mut assembler = FrameAssembler::new(config.frame_size, config.sample_rate);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate,
            channels,
            target_rate = config.sample_rate,
            frame_size = config.frame_size,
            "audio capture initialized"
        );

        let sink = move |data: &[f32]| {
            let mono = downmix(data, channels);
            let mono = match resampler.as_mut() {
                Some(r) => match r.process(&mono) {
                    Ok(converted) => converted,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping capture block");
                        return;
                    }
                },
                None => mono,
            };

            for frame in assembler.push(&mono) {
                if let Err(mpsc::error::TrySendError::Full(_)) = frames.try_send(frame) {
                    tracing::trace!("capture channel full, frame dropped");
                }
            }
        };

        let stream = match sample_format {
            SampleFormat::F32 => build_input_stream::<f32, _>(&device, &stream_config, sink),
            SampleFormat::I16 => build_input_stream::<i16, _>(&device, &stream_config, sink),
            SampleFormat::I32 => build_input_stream::<i32, _>(&device, &stream_config, sink),
            SampleFormat::U16 => build_input_stream::<u16, _>(&device, &stream_config, sink),
            other => Err(Error::MicrophoneAccess(format!(
                "unsupported sample format: {other:?}"
            ))),
        }?;

        stream
            .play()
            .map_err(|e| Error::MicrophoneAccess(e.to_string()))?;

        tracing::debug!("audio capture started");
        Ok(Self {
            stream: Some(stream),
        })
    }
}

impl AudioInput for CpalInput {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "pause before drop failed");
            }
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream<T, F>(device: &Device, config: &StreamConfig, mut sink: F) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
    F: FnMut(&[f32]) + Send + 'static,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
                sink(&scratch);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::MicrophoneAccess(e.to_string()))
}

/// One scheduled buffer inside the mixer
struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
    /// Fractional read position in `samples`
    position: f64,
    /// Source samples advanced per device frame
    step: f64,
}

impl Voice {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn next_sample(&mut self) -> Option<f32> {
        let index = self.position as usize;
        let current = *self.samples.get(index)?;
        let next = self.samples.get(index + 1).copied().unwrap_or(current);
        let frac = (self.position - index as f64) as f32;
        self.position += self.step;
        Some((next - current).mul_add(frac, current))
    }
}

/// Sums every due voice through the shared gain stage
struct Mixer {
    voices: Vec<Voice>,
    gain: f32,
    ended: mpsc::UnboundedSender<SourceId>,
}

impl Mixer {
    fn render(&mut self, out: &mut [f32], channels: usize, first_frame: u64) {
        for (offset, frame) in out.chunks_mut(channels).enumerate() {
            let now = first_frame + offset as u64;
            let mut mixed = 0.0f32;
            for voice in &mut self.voices {
                if now < voice.start_frame {
                    continue;
                }
                if let Some(sample) = voice.next_sample() {
                    mixed += sample;
                }
            }
            let value = (mixed * self.gain).clamp(-1.0, 1.0);
            frame.fill(value);
        }

        let ended = &self.ended;
        self.voices.retain(|voice| {
            #[allow(clippy::cast_precision_loss)]
            let done = voice.position >= voice.samples.len() as f64;
            if done {
                let _ = ended.send(voice.id);
            }
            !done
        });
    }
}

/// Speaker stream with a frame-counted clock
struct CpalOutput {
    stream: Option<Stream>,
    mixer: Arc<Mutex<Mixer>>,
    frames_rendered: Arc<AtomicU64>,
    device_rate: u32,
    sample_rate: u32,
}

impl CpalOutput {
    fn open(sample_rate: u32, gain: f32, ended: mpsc::UnboundedSender<SourceId>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioSetup("no output device available".to_string()))?;

        let matches_rate = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && is_supported_format(c.sample_format())
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        };

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::AudioSetup(e.to_string()))?
            .find(|c| matches_rate(c, 1))
            .or_else(|| {
                // Fallback: try stereo
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| matches_rate(c, 2))
            })
            .map(|c| c.with_sample_rate(SampleRate(sample_rate)));

        let supported = match supported {
            Some(c) => c,
            None => device
                .default_output_config()
                .map_err(|e| Error::AudioSetup(e.to_string()))?,
        };

        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let device_rate = config.sample_rate.0;

        let mixer = Arc::new(Mutex::new(Mixer {
            voices: Vec::new(),
            gain,
            ended,
        }));
        let frames_rendered = Arc::new(AtomicU64::new(0));

        let stream = match sample_format {
            SampleFormat::F32 => {
                build_output_stream::<f32>(&device, &config, &mixer, &frames_rendered)
            }
            SampleFormat::I16 => {
                build_output_stream::<i16>(&device, &config, &mixer, &frames_rendered)
            }
            SampleFormat::I32 => {
                build_output_stream::<i32>(&device, &config, &mixer, &frames_rendered)
            }
            SampleFormat::U16 => {
                build_output_stream::<u16>(&device, &config, &mixer, &frames_rendered)
            }
            other => Err(Error::AudioSetup(format!(
                "unsupported sample format: {other:?}"
            ))),
        }?;

        stream.play().map_err(|e| Error::AudioSetup(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            device_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            stream: Some(stream),
            mixer,
            frames_rendered,
            device_rate,
            sample_rate,
        })
    }
}

impl AudioOutput for CpalOutput {
    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / f64::from(self.device_rate)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start_source(
        &mut self,
        id: SourceId,
        buffer: DecodedAudioBuffer,
        start_at: f64,
    ) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Audio("output is closed".to_string()));
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_frame = (start_at.max(0.0) * f64::from(self.device_rate)).round() as u64;
        let step = f64::from(buffer.sample_rate) / f64::from(self.device_rate);

        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| Error::Audio("mixer lock poisoned".to_string()))?;
        mixer.voices.push(Voice {
            id,
            start_frame,
            samples: buffer.samples,
            position: 0.0,
            step,
        });
        drop(mixer);

        tracing::trace!(id, start_at, "source scheduled");
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.voices.retain(|voice| voice.id != id);
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Ok(mut mixer) = self.mixer.lock() {
                mixer.voices.clear();
            }
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "pause before drop failed");
            }
            drop(stream);
            tracing::debug!("audio playback closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mixer: &Arc<Mutex<Mixer>>,
    frames_rendered: &Arc<AtomicU64>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));
    let mixer = Arc::clone(mixer);
    let frames_rendered = Arc::clone(frames_rendered);
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.clear();
                scratch.resize(data.len(), 0.0);

                let first_frame = frames_rendered.load(Ordering::Acquire);
                if let Ok(mut mixer) = mixer.lock() {
                    mixer.render(&mut scratch, channels, first_frame);
                }

                for (out, &value) in data.iter_mut().zip(&scratch) {
                    *out = T::from_sample(value);
                }
                frames_rendered.fetch_add((data.len() / channels) as u64, Ordering::Release);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::AudioSetup(e.to_string()))
}

/// Direction of an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

/// An audio device visible to the host
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub kind: DeviceKind,
    pub is_default: bool,
}

/// List input and output devices of the default host
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_input = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();
    let default_output = host
        .default_output_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let mut devices = Vec::new();

    for device in host
        .input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
    {
        if let Ok(name) = device.name() {
            devices.push(DeviceInfo {
                is_default: name == default_input,
                name,
                kind: DeviceKind::Input,
            });
        }
    }

    for device in host
        .output_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
    {
        if let Ok(name) = device.name() {
            devices.push(DeviceInfo {
                is_default: name == default_output,
                name,
                kind: DeviceKind::Output,
            });
        }
    }

    Ok(devices)
}
