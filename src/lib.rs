//! live-voice - real-time voice conversations with a remote speech model
//!
//! This library provides the audio pipeline behind the `live-voice` binary:
//! - Microphone capture and 16-bit PCM encoding
//! - Gapless scheduling of streamed model audio
//! - Barge-in (interruption) handling
//! - Session lifecycle with auto-disconnect on goodbye
//! - Gemini Live WebSocket adapter
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   frames    ┌───────────────────┐  realtimeInput  ┌──────────────┐
//! │  Microphone  │ ──────────▶ │                   │ ──────────────▶ │              │
//! │  (cpal in)   │             │ SessionController │                 │  Live model  │
//! ├──────────────┤   sources   │  capture/playback │   serverContent │  (WebSocket) │
//! │   Speaker    │ ◀────────── │  barge-in/farewell│ ◀────────────── │              │
//! │  (cpal out)  │             └───────────────────┘                 └──────────────┘
//! └──────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod prompt;
pub mod session;
pub mod voice;

pub use config::Config;
pub use controller::{ConnectionState, ControllerSettings, SessionController};
pub use error::{Error, Result};
pub use prompt::{FilePromptStore, MemoryPromptStore, PromptStore};
pub use session::{LiveConfig, LiveSession, LiveTransport, ServerMessage, SessionEvent};
