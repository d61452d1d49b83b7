//! Shared test utilities
//!
//! Scripted audio devices with a hand-driven output clock and a recording
//! remote session, so the pipeline runs without hardware or network.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::mpsc;

use live_voice::audio::{
    AudioBackend, AudioFrame, AudioInput, AudioOutput, CaptureConfig, DecodedAudioBuffer,
    EncodedBlob, OUTPUT_SAMPLE_RATE, SourceId,
};
use live_voice::prompt::MemoryPromptStore;
use live_voice::session::{LiveConfig, LiveSession, LiveTransport, ModelPart, ServerMessage, SessionEvent};
use live_voice::{ControllerSettings, Error, Result, SessionController};

/// A source handed to the fake speaker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Started {
    pub id: SourceId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Default)]
struct AudioState {
    now: f64,
    deny_mic: bool,
    fail_output: bool,
    mic: Option<mpsc::Sender<AudioFrame>>,
    mic_opens: usize,
    input_stops: usize,
    ended: Option<mpsc::UnboundedSender<SourceId>>,
    output_opens: usize,
    output_closes: usize,
    started: Vec<Started>,
    stopped: Vec<SourceId>,
    sounding: BTreeSet<SourceId>,
}

/// Scripted microphone and speaker
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<AudioState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose microphone access is denied
    pub fn denying_mic() -> Self {
        let backend = Self::new();
        backend.state.lock().unwrap().deny_mic = true;
        backend
    }

    /// Backend whose speaker cannot be opened
    pub fn failing_output() -> Self {
        let backend = Self::new();
        backend.state.lock().unwrap().fail_output = true;
        backend
    }

    pub fn boxed(&self) -> Box<dyn AudioBackend> {
        Box::new(self.clone())
    }

    /// Set the speaker clock
    pub fn set_now(&self, seconds: f64) {
        self.state.lock().unwrap().now = seconds;
    }

    /// Deliver one captured frame; false if the microphone is not running
    pub fn capture(&self, samples: &[f32]) -> bool {
        let state = self.state.lock().unwrap();
        state.mic.as_ref().is_some_and(|mic| {
            mic.try_send(AudioFrame::new(samples.to_vec(), 16000))
                .is_ok()
        })
    }

    /// Unplug the microphone: its frame stream ends without a stop
    pub fn unplug_mic(&self) {
        self.state.lock().unwrap().mic = None;
    }

    /// Let a source play to completion
    pub fn finish(&self, id: SourceId) {
        let mut state = self.state.lock().unwrap();
        if state.sounding.remove(&id) {
            if let Some(ended) = state.ended.as_ref() {
                let _ = ended.send(id);
            }
        }
    }

    pub fn started(&self) -> Vec<Started> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn sounding(&self) -> usize {
        self.state.lock().unwrap().sounding.len()
    }

    pub fn mic_active(&self) -> bool {
        self.state.lock().unwrap().mic.is_some()
    }

    pub fn mic_opens(&self) -> usize {
        self.state.lock().unwrap().mic_opens
    }

    pub fn input_stops(&self) -> usize {
        self.state.lock().unwrap().input_stops
    }

    pub fn output_opens(&self) -> usize {
        self.state.lock().unwrap().output_opens
    }

    pub fn output_closes(&self) -> usize {
        self.state.lock().unwrap().output_closes
    }

    /// Open the fake speaker directly (for scheduler tests)
    pub fn speaker(&self) -> (Box<dyn AudioOutput>, mpsc::UnboundedReceiver<SourceId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let output = self.open_output(OUTPUT_SAMPLE_RATE, 1.0, tx).unwrap();
        (output, rx)
    }
}

struct FakeInput {
    state: Arc<Mutex<AudioState>>,
}

impl AudioInput for FakeInput {
    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.input_stops += 1;
        state.mic = None;
    }

    fn is_active(&self) -> bool {
        self.state.lock().unwrap().mic.is_some()
    }
}

struct FakeOutput {
    state: Arc<Mutex<AudioState>>,
    closed: bool,
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE
    }

    fn start_source(&mut self, id: SourceId, buffer: DecodedAudioBuffer, start_at: f64) -> Result<()> {
        if self.closed {
            return Err(Error::Audio("output closed".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.started.push(Started {
            id,
            start: start_at,
            duration: buffer.duration(),
        });
        state.sounding.insert(id);
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        let mut state = self.state.lock().unwrap();
        if state.sounding.remove(&id) {
            state.stopped.push(id);
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.state.lock().unwrap();
        state.output_closes += 1;
        state.ended = None;
        let ids: Vec<SourceId> = state.sounding.iter().copied().collect();
        state.stopped.extend(ids);
        state.sounding.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(
        &self,
        _config: &CaptureConfig,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Box<dyn AudioInput>> {
        let mut state = self.state.lock().unwrap();
        if state.deny_mic {
            return Err(Error::MicrophoneAccess("permission denied".to_string()));
        }
        state.mic = Some(frames);
        state.mic_opens += 1;
        Ok(Box::new(FakeInput {
            state: Arc::clone(&self.state),
        }))
    }

    fn open_output(
        &self,
        _sample_rate: u32,
        _gain: f32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioOutput>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_output {
            return Err(Error::AudioSetup("no output device".to_string()));
        }
        state.ended = Some(ended);
        state.output_opens += 1;
        Ok(Box::new(FakeOutput {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

#[derive(Default)]
struct RemoteState {
    fail_open: Option<String>,
    fail_sends: Option<String>,
    configs: Vec<LiveConfig>,
    senders: Vec<mpsc::UnboundedSender<SessionEvent>>,
    sent: Vec<EncodedBlob>,
    closes: usize,
}

/// Remote side that records everything and emits scripted events
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<RemoteState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose `open` fails with a transport error
    pub fn refusing(reason: &str) -> Self {
        let transport = Self::new();
        transport.state.lock().unwrap().fail_open = Some(reason.to_string());
        transport
    }

    /// Make every later `send_input` fail with a transport error
    pub fn fail_sends(&self, reason: &str) {
        self.state.lock().unwrap().fail_sends = Some(reason.to_string());
    }

    pub fn shared(&self) -> Arc<dyn LiveTransport> {
        Arc::new(self.clone())
    }

    /// Emit an event on the latest session; false if nobody listens
    pub fn emit(&self, event: SessionEvent) -> bool {
        let state = self.state.lock().unwrap();
        state
            .senders
            .last()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Emit on the session opened `index`-th
    pub fn emit_on(&self, index: usize, event: SessionEvent) -> bool {
        let state = self.state.lock().unwrap();
        state
            .senders
            .get(index)
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().configs.len()
    }

    pub fn configs(&self) -> Vec<LiveConfig> {
        self.state.lock().unwrap().configs.clone()
    }

    pub fn sent(&self) -> Vec<EncodedBlob> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

#[async_trait]
impl LiveTransport for FakeTransport {
    async fn open(
        &self,
        config: &LiveConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn LiveSession>> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.fail_open.clone() {
            return Err(Error::Transport(reason));
        }
        state.configs.push(config.clone());
        state.senders.push(events);
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
            closed: Mutex::new(false),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<RemoteState>>,
    closed: Mutex<bool>,
}

impl LiveSession for FakeSession {
    fn send_input(&self, blob: EncodedBlob) -> Result<()> {
        if *self.closed.lock().unwrap() {
            return Err(Error::Transport("session closed".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.fail_sends.clone() {
            return Err(Error::Transport(reason));
        }
        state.sent.push(blob);
        Ok(())
    }

    fn close(&self) {
        let mut closed = self.closed.lock().unwrap();
        if !*closed {
            *closed = true;
            self.state.lock().unwrap().closes += 1;
        }
    }
}

/// Controller wired to the fakes with an in-memory prompt store
pub fn controller(
    backend: &FakeBackend,
    transport: &FakeTransport,
    settings: ControllerSettings,
) -> SessionController {
    SessionController::new(
        transport.shared(),
        backend.boxed(),
        Arc::new(MemoryPromptStore::new()),
        settings,
    )
}

/// Silent 24kHz fragment of the given length
pub fn fragment(seconds: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let samples = (seconds * f64::from(OUTPUT_SAMPLE_RATE)).round() as usize;
    STANDARD.encode(vec![0u8; samples * 2])
}

/// Fragment whose decoded payload has an odd byte count
pub fn odd_fragment() -> String {
    STANDARD.encode([0u8; 5])
}

/// Model message carrying audio fragments
pub fn audio_message(fragments: &[String]) -> SessionEvent {
    SessionEvent::Message(ServerMessage {
        parts: fragments.iter().map(ModelPart::audio).collect(),
        ..Default::default()
    })
}

/// Model message carrying text only
pub fn text_message(text: &str) -> SessionEvent {
    SessionEvent::Message(ServerMessage {
        parts: vec![ModelPart::text(text)],
        ..Default::default()
    })
}

/// Barge-in notification
pub fn interrupted() -> SessionEvent {
    SessionEvent::Message(ServerMessage {
        interrupted: true,
        ..Default::default()
    })
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
