//! TOML configuration file loading
//!
//! Supports `~/.config/devtech/live-voice/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LiveVoiceConfigFile {
    /// Remote session settings
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Capture and playback settings
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Auto-disconnect on goodbye
    #[serde(default)]
    pub farewell: FarewellFileConfig,

    /// API keys for the remote service
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Where the prompt override lives
    pub data_dir: Option<String>,
}

/// Remote session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Live model (e.g. "gemini-2.5-flash-native-audio-preview-09-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Charon")
    pub voice: Option<String>,

    /// WebSocket endpoint override
    pub endpoint: Option<String>,

    /// Request transcripts of the model's speech
    pub output_transcription: Option<bool>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Samples per captured frame
    pub frame_size: Option<usize>,

    /// Frames held while the session is connecting
    pub pending_capacity: Option<usize>,

    /// Output gain applied to all model audio
    pub output_gain: Option<f32>,
}

/// Farewell policy configuration
#[derive(Debug, Default, Deserialize)]
pub struct FarewellFileConfig {
    pub enabled: Option<bool>,

    /// Replaces the built-in phrase list
    pub phrases: Option<Vec<String>>,

    /// Seconds between the goodbye and the disconnect
    pub delay_secs: Option<f64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LiveVoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LiveVoiceConfigFile {
    config_file_path().map_or_else(LiveVoiceConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files yield defaults.
pub fn load_config_file_from(path: &Path) -> LiveVoiceConfigFile {
    if !path.exists() {
        return LiveVoiceConfigFile::default();
    }

    match parse_config_file(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            LiveVoiceConfigFile::default()
        }
    }
}

/// Read and parse a TOML config file
///
/// # Errors
///
/// Returns [`crate::Error::Io`] if the file cannot be read, or
/// [`crate::Error::Toml`] if it is not a valid config file
pub fn parse_config_file(path: &Path) -> Result<LiveVoiceConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/devtech/live-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("devtech")
            .join("live-voice")
            .join("config.toml")
    })
}
