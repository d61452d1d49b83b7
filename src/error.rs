//! Error types for the live voice client

use thiserror::Error;

use crate::audio::DecodeError;

/// Result type alias for live voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the live voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone denied or unavailable
    #[error("microphone unavailable: {0}")]
    MicrophoneAccess(String),

    /// Audio device (input or output context) could not be created
    #[error("audio setup failed: {0}")]
    AudioSetup(String),

    /// Audio error on an already running device
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed incoming audio fragment
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Remote session failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation not allowed in the current connection state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Prompt store error
    #[error("prompt store error: {0}")]
    Prompt(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error aborted connection setup before a session existed
    #[must_use]
    pub const fn is_setup_failure(&self) -> bool {
        matches!(self, Self::MicrophoneAccess(_) | Self::AudioSetup(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_family() {
        assert!(Error::MicrophoneAccess("denied".to_string()).is_setup_failure());
        assert!(Error::AudioSetup("no output".to_string()).is_setup_failure());
        assert!(!Error::Transport("reset".to_string()).is_setup_failure());
    }

    #[test]
    fn decode_error_converts() {
        let err: Error = DecodeError::OddLength(3).into();
        assert!(matches!(err, Error::Decode(DecodeError::OddLength(3))));
        assert!(err.to_string().contains("odd"));
    }
}
