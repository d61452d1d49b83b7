//! Remote conversational session boundary
//!
//! The controller only sees a [`LiveTransport`] that opens a [`LiveSession`]
//! and pushes [`SessionEvent`]s into a channel. The wire protocol lives
//! behind it in [`gemini`].

pub mod gemini;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use gemini::GeminiTransport;

use crate::Result;
use crate::audio::EncodedBlob;

/// Default Live model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Charon";

/// What the model answers with; this client only plays speech
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Modality {
    #[default]
    Audio,
}

impl Modality {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "AUDIO",
        }
    }
}

/// Parameters of one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    pub model: String,
    pub response_modality: Modality,
    pub voice: String,
    pub system_instruction: String,
    /// Ask the server to transcribe its own speech
    pub output_transcription: bool,
}

impl LiveConfig {
    #[must_use]
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            response_modality: Modality::Audio,
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: system_instruction.into(),
            output_transcription: true,
        }
    }
}

/// Lifecycle and content notifications from the remote side
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session is ready to accept input
    Open,
    Message(ServerMessage),
    /// The remote side ended the session
    Closed { reason: Option<String> },
    Error(String),
}

/// Content pushed by the model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMessage {
    /// The user spoke over the model; queued audio is stale
    pub interrupted: bool,
    pub turn_complete: bool,
    pub parts: Vec<ModelPart>,
}

impl ServerMessage {
    /// Audio payloads in arrival order
    pub fn audio(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| p.inline_audio.as_deref())
    }

    /// Text payloads in arrival order
    pub fn text(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| p.text.as_deref())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.interrupted && !self.turn_complete && self.parts.is_empty()
    }
}

/// One piece of model output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelPart {
    /// Base64 of 24kHz little-endian 16-bit PCM
    pub inline_audio: Option<String>,
    pub text: Option<String>,
}

impl ModelPart {
    #[must_use]
    pub fn audio(data: impl Into<String>) -> Self {
        Self {
            inline_audio: Some(data.into()),
            text: None,
        }
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            inline_audio: None,
            text: Some(text.into()),
        }
    }
}

/// Opens remote sessions
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Start a session; every event it produces goes to `events`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the connection cannot be made
    async fn open(
        &self,
        config: &LiveConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn LiveSession>>;
}

/// A live remote session
pub trait LiveSession: Send {
    /// Forward one encoded microphone frame
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the session is gone
    fn send_input(&self, blob: EncodedBlob) -> Result<()>;

    /// Close the session. Idempotent.
    fn close(&self);
}
