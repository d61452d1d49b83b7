//! Session lifecycle
//!
//! [`SessionController`] owns one conversation at a time: the microphone,
//! the speaker, the remote session and the glue between them. Everything
//! runs on the task that drives [`SessionController::run`]; audio threads and
//! the socket tasks only talk to it through channels.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::audio::{AudioBackend, CaptureConfig, EncodedBlob, OUTPUT_SAMPLE_RATE, SourceId};
use crate::prompt::PromptStore;
use crate::session::{LiveConfig, LiveSession, LiveTransport, ServerMessage, SessionEvent};
use crate::voice::{
    CapturePipeline, DEFAULT_FAREWELL_PHRASES, DEFAULT_PENDING_CAPACITY, FarewellDetector,
    InterruptionHandler, PendingFrames, PlaybackScheduler,
};
use crate::{Error, Result};

/// Connection status as seen by the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Tunables for a [`SessionController`]
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Session parameters; the system instruction is read from the prompt
    /// store on every connect
    pub live: LiveConfig,
    pub capture: CaptureConfig,
    pub output_gain: f32,
    pub pending_capacity: usize,
    /// `None` disables auto-disconnect
    pub farewell_phrases: Option<Vec<String>>,
    pub farewell_delay: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            live: LiveConfig::new(String::new()),
            capture: CaptureConfig::default(),
            output_gain: 1.0,
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            farewell_phrases: Some(
                DEFAULT_FAREWELL_PHRASES
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            ),
            farewell_delay: Duration::from_secs(4),
        }
    }
}

/// What woke the event loop
enum LoopEvent {
    Session(Option<SessionEvent>),
    Captured(Option<EncodedBlob>),
    SourceEnded(Option<SourceId>),
    AutoDisconnect,
    Shutdown,
}

/// Drives one voice conversation at a time
pub struct SessionController {
    transport: Arc<dyn LiveTransport>,
    backend: Box<dyn AudioBackend>,
    prompts: Arc<dyn PromptStore>,
    settings: ControllerSettings,

    state: watch::Sender<ConnectionState>,
    speaking: watch::Sender<bool>,

    capture: Option<CapturePipeline>,
    playback: PlaybackScheduler,
    barge_in: InterruptionHandler,
    farewell: Option<FarewellDetector>,
    /// Model text of the current turn; transcripts arrive in pieces
    transcript: String,
    pending: PendingFrames,
    session: Option<Box<dyn LiveSession>>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    ended: Option<mpsc::UnboundedReceiver<SourceId>>,
    auto_disconnect: Option<Instant>,

    frames_sent: u64,
    last_error: Option<String>,
    failure: Option<Error>,
}

impl SessionController {
    #[must_use]
    pub fn new(
        transport: Arc<dyn LiveTransport>,
        backend: Box<dyn AudioBackend>,
        prompts: Arc<dyn PromptStore>,
        settings: ControllerSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (speaking, _) = watch::channel(false);
        let pending = PendingFrames::new(settings.pending_capacity);

        Self {
            transport,
            backend,
            prompts,
            settings,
            state,
            speaking,
            capture: None,
            playback: PlaybackScheduler::new(),
            barge_in: InterruptionHandler::new(),
            farewell: None,
            transcript: String::new(),
            pending,
            session: None,
            events: None,
            ended: None,
            auto_disconnect: None,
            frames_sent: 0,
            last_error: None,
            failure: None,
        }
    }

    /// Open the speaker and microphone and start a remote session
    ///
    /// On success the state is `Connecting`; it becomes `Connected` when the
    /// remote side reports the session open. On failure everything acquired
    /// so far is released and the state is back to `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless disconnected, or the setup
    /// error (microphone, speaker, prompt store or transport)
    #[allow(clippy::future_not_send)]
    pub async fn connect(&mut self) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            return Err(Error::InvalidState("connect requires a disconnected session"));
        }

        self.last_error = None;
        self.failure = None;
        self.set_state(ConnectionState::Connecting);
        tracing::info!(model = %self.settings.live.model, voice = %self.settings.live.voice, "connecting");

        if let Err(e) = self.open().await {
            tracing::error!(error = %e, "connect failed");
            self.teardown();
            self.last_error = Some(e.to_string());
            return Err(e);
        }

        Ok(())
    }

    #[allow(clippy::future_not_send)]
    async fn open(&mut self) -> Result<()> {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let output =
            self.backend
                .open_output(OUTPUT_SAMPLE_RATE, self.settings.output_gain, ended_tx)?;
        self.playback.attach(output);
        self.ended = Some(ended_rx);

        self.capture = Some(CapturePipeline::start(
            self.backend.as_ref(),
            &self.settings.capture,
        )?);

        let config = LiveConfig {
            system_instruction: self.prompts.get()?,
            ..self.settings.live.clone()
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events = Some(events_rx);
        self.session = Some(self.transport.open(&config, events_tx).await?);

        self.farewell = self
            .settings
            .farewell_phrases
            .as_ref()
            .map(FarewellDetector::new);
        self.frames_sent = 0;

        Ok(())
    }

    /// React to a lifecycle or content notification from the session
    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Open => {
                if self.state() != ConnectionState::Connecting {
                    tracing::debug!(state = %self.state(), "ignoring open outside connecting");
                    return;
                }
                self.set_state(ConnectionState::Connected);
                tracing::info!(queued = self.pending.len(), "session open");
                self.flush_pending();
            }
            SessionEvent::Message(message) => self.handle_message(message),
            SessionEvent::Closed { reason } => {
                tracing::info!(reason = reason.as_deref().unwrap_or("none"), "session closed");
                self.teardown();
            }
            SessionEvent::Error(message) => {
                tracing::error!(error = %message, "session error");
                self.fail(Error::Transport(message));
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }

        if message.interrupted {
            self.transcript.clear();
            self.barge_in.interrupt(&mut self.playback);
            self.set_speaking(false);
            return;
        }

        for part in message.parts {
            if let Some(text) = part.text.as_deref() {
                tracing::debug!(text, "model text");
                self.check_farewell(text);
            }

            let Some(audio) = part.inline_audio else {
                continue;
            };
            match self.playback.schedule(&audio) {
                Ok(Some(_)) => self.set_speaking(true),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "dropping audio fragment"),
            }
        }

        if message.turn_complete {
            tracing::debug!(active = self.playback.active_count(), "model turn complete");
            self.transcript.clear();
        }
    }

    fn check_farewell(&mut self, text: &str) {
        let Some(detector) = self.farewell.as_mut() else {
            return;
        };
        self.transcript.push_str(text);
        if !detector.check(&self.transcript) || self.auto_disconnect.is_some() {
            return;
        }

        let deadline = Instant::now() + self.settings.farewell_delay;
        self.auto_disconnect = Some(deadline);
        tracing::info!(
            delay_ms = u64::try_from(self.settings.farewell_delay.as_millis()).unwrap_or(u64::MAX),
            "farewell heard, disconnect scheduled"
        );
    }

    /// Route one encoded microphone frame
    ///
    /// Sent when connected, held when connecting, dropped otherwise.
    pub fn handle_captured_blob(&mut self, blob: EncodedBlob) {
        match self.state() {
            ConnectionState::Connected => self.send(blob),
            ConnectionState::Connecting => self.pending.push(blob),
            ConnectionState::Disconnected => {}
        }
    }

    fn send(&mut self, blob: EncodedBlob) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        match session.send_input(blob) {
            Ok(()) => self.frames_sent += 1,
            Err(e) => self.fail(e),
        }
    }

    fn flush_pending(&mut self) {
        let Some(session) = self.session.as_ref() else {
            self.pending.clear();
            return;
        };

        let mut result = Ok(());
        for blob in self.pending.drain() {
            result = session.send_input(blob);
            if result.is_err() {
                break;
            }
            self.frames_sent += 1;
        }

        if let Err(e) = result {
            self.fail(e);
        }
    }

    /// Bookkeeping for a playback source that finished on its own
    pub fn handle_source_ended(&mut self, id: SourceId) {
        if self.playback.on_source_ended(id) {
            tracing::trace!("playback drained");
            self.set_speaking(false);
        }
    }

    /// Tear the conversation down. Safe from any state, idempotent.
    pub fn disconnect(&mut self) {
        if self.state() != ConnectionState::Disconnected {
            tracing::info!(frames_sent = self.frames_sent, "disconnecting");
        }
        self.teardown();
    }

    fn fail(&mut self, error: Error) {
        self.last_error = Some(error.to_string());
        self.failure = Some(error);
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.playback.shutdown();
        self.set_speaking(false);

        if let Some(session) = self.session.take() {
            session.close();
        }
        self.events = None;
        self.ended = None;

        self.pending.clear();
        self.auto_disconnect = None;
        self.farewell = None;
        self.transcript.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Drive the conversation until it ends or `shutdown` fires
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session, if it did not end cleanly
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self, shutdown: &mut mpsc::Receiver<()>) -> Result<()> {
        while self.state() != ConnectionState::Disconnected {
            match self.next_event(shutdown).await {
                LoopEvent::Session(Some(event)) => self.handle_session_event(event),
                LoopEvent::Session(None) => {
                    self.fail(Error::Transport("session event stream ended".to_string()));
                }
                LoopEvent::Captured(Some(blob)) => self.handle_captured_blob(blob),
                LoopEvent::Captured(None) => {
                    tracing::error!("microphone stream ended");
                    self.fail(Error::Audio("microphone stream ended".to_string()));
                }
                LoopEvent::SourceEnded(Some(id)) => self.handle_source_ended(id),
                LoopEvent::SourceEnded(None) => self.ended = None,
                LoopEvent::AutoDisconnect => {
                    tracing::info!("farewell delay elapsed");
                    self.disconnect();
                }
                LoopEvent::Shutdown => {
                    tracing::info!("shutdown requested");
                    self.disconnect();
                }
            }
        }

        self.failure.take().map_or(Ok(()), Err)
    }

    #[allow(clippy::future_not_send)]
    async fn next_event(&mut self, shutdown: &mut mpsc::Receiver<()>) -> LoopEvent {
        let deadline = self.auto_disconnect;
        let events = self.events.as_mut();
        let ended = self.ended.as_mut();
        let capture = self.capture.as_mut();

        tokio::select! {
            biased;

            Some(()) = shutdown.recv() => LoopEvent::Shutdown,
            event = recv_or_pending(events) => LoopEvent::Session(event),
            id = recv_or_pending(ended) => LoopEvent::SourceEnded(id),
            blob = next_blob_or_pending(capture) => LoopEvent::Captured(blob),
            () = sleep_or_pending(deadline) => LoopEvent::AutoDisconnect,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether model audio is currently sounding
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    #[must_use]
    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.speaking.subscribe()
    }

    /// Message of the error that ended the last connection attempt or session
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Playback cursor in seconds on the output clock
    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.playback.cursor()
    }

    #[must_use]
    pub fn active_sources(&self) -> usize {
        self.playback.active_count()
    }

    /// Frames held until the session opens
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub const fn auto_disconnect_deadline(&self) -> Option<Instant> {
        self.auto_disconnect
    }

    #[must_use]
    pub const fn interruptions(&self) -> u64 {
        self.barge_in.count()
    }

    /// Frames delivered to the current session
    #[must_use]
    pub const fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
        if changed {
            tracing::debug!(state = %next, "connection state changed");
        }
    }

    fn set_speaking(&self, speaking: bool) {
        self.speaking.send_if_modified(|current| {
            let changed = *current != speaking;
            *current = speaking;
            changed
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn recv_or_pending<T>(rx: Option<&mut mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_blob_or_pending(capture: Option<&mut CapturePipeline>) -> Option<EncodedBlob> {
    match capture {
        Some(capture) => capture.next_blob().await,
        None => std::future::pending().await,
    }
}

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_default_settings() {
        let settings = ControllerSettings::default();
        assert_eq!(settings.farewell_delay, Duration::from_secs(4));
        assert_eq!(settings.pending_capacity, 32);
        assert!(settings.farewell_phrases.is_some_and(|p| p.iter().any(|p| p == "hasta luego")));
    }
}
