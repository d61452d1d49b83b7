//! Microphone capture pipeline

use tokio::sync::mpsc;

use crate::Result;
use crate::audio::{AudioBackend, AudioFrame, AudioInput, CaptureConfig, EncodedBlob, encode_frame};

/// Owns the microphone stream and turns captured frames into encoded blobs
pub struct CapturePipeline {
    input: Option<Box<dyn AudioInput>>,
    frames: mpsc::Receiver<AudioFrame>,
    frames_encoded: u64,
}

impl CapturePipeline {
    /// Acquire the microphone and start capturing
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MicrophoneAccess`] if the microphone cannot be
    /// opened
    pub fn start(backend: &dyn AudioBackend, config: &CaptureConfig) -> Result<Self> {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let input = backend.open_input(config, tx)?;

        tracing::debug!(
            sample_rate = config.sample_rate,
            frame_size = config.frame_size,
            "capture pipeline started"
        );

        Ok(Self {
            input: Some(input),
            frames: rx,
            frames_encoded: 0,
        })
    }

    /// Wait for the next captured frame and encode it
    ///
    /// Frames come out in capture order. Returns `None` once the pipeline is
    /// stopped and drained, or the device went away.
    pub async fn next_blob(&mut self) -> Option<EncodedBlob> {
        let frame = self.frames.recv().await?;
        self.frames_encoded += 1;
        Some(encode_frame(&frame.samples))
    }

    /// Stop the microphone. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut input) = self.input.take() {
            input.stop();
            self.frames.close();
            tracing::debug!(frames = self.frames_encoded, "capture pipeline stopped");
        }
    }

    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.input.as_ref().is_some_and(|input| input.is_active())
    }

    #[must_use]
    pub const fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::audio::{AudioOutput, SourceId};
    use crate::Error;

    #[derive(Default)]
    struct MicState {
        sender: Option<mpsc::Sender<AudioFrame>>,
        stops: usize,
    }

    struct ScriptedInput(Arc<Mutex<MicState>>);

    impl AudioInput for ScriptedInput {
        fn stop(&mut self) {
            let mut mic = self.0.lock().unwrap();
            mic.stops += 1;
            mic.sender = None;
        }

        fn is_active(&self) -> bool {
            self.0.lock().unwrap().sender.is_some()
        }
    }

    struct ScriptedBackend {
        mic: Arc<Mutex<MicState>>,
        deny: bool,
    }

    impl AudioBackend for ScriptedBackend {
        fn open_input(
            &self,
            _config: &CaptureConfig,
            frames: mpsc::Sender<AudioFrame>,
        ) -> Result<Box<dyn AudioInput>> {
            if self.deny {
                return Err(Error::MicrophoneAccess("permission denied".to_string()));
            }
            self.mic.lock().unwrap().sender = Some(frames);
            Ok(Box::new(ScriptedInput(Arc::clone(&self.mic))))
        }

        fn open_output(
            &self,
            _sample_rate: u32,
            _gain: f32,
            _ended: mpsc::UnboundedSender<SourceId>,
        ) -> Result<Box<dyn AudioOutput>> {
            Err(Error::AudioSetup("not used".to_string()))
        }
    }

    #[tokio::test]
    async fn test_frames_encoded_in_order() {
        let mic = Arc::new(Mutex::new(MicState::default()));
        let backend = ScriptedBackend {
            mic: Arc::clone(&mic),
            deny: false,
        };
        let mut pipeline = CapturePipeline::start(&backend, &CaptureConfig::default()).unwrap();
        assert!(pipeline.is_capturing());

        let sender = mic.lock().unwrap().sender.clone().unwrap();
        sender.send(AudioFrame::new(vec![0.5; 4], 16000)).await.unwrap();
        sender.send(AudioFrame::new(vec![-0.5; 4], 16000)).await.unwrap();

        let first = pipeline.next_blob().await.unwrap();
        let second = pipeline.next_blob().await.unwrap();
        assert_eq!(first, encode_frame(&[0.5; 4]));
        assert_eq!(second, encode_frame(&[-0.5; 4]));
        assert_eq!(pipeline.frames_encoded(), 2);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mic = Arc::new(Mutex::new(MicState::default()));
        let backend = ScriptedBackend {
            mic: Arc::clone(&mic),
            deny: false,
        };
        let mut pipeline = CapturePipeline::start(&backend, &CaptureConfig::default()).unwrap();

        pipeline.stop();
        pipeline.stop();
        drop(pipeline);

        assert_eq!(mic.lock().unwrap().stops, 1);
    }

    #[tokio::test]
    async fn test_denied_microphone() {
        let backend = ScriptedBackend {
            mic: Arc::new(Mutex::new(MicState::default())),
            deny: true,
        };
        let result = CapturePipeline::start(&backend, &CaptureConfig::default());
        assert!(matches!(result, Err(Error::MicrophoneAccess(_))));
    }
}
