//! Configuration management for the live voice client

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::audio::{CaptureConfig, FRAME_SIZE};
use crate::controller::ControllerSettings;
use crate::session::gemini::DEFAULT_ENDPOINT;
use crate::session::{DEFAULT_MODEL, DEFAULT_VOICE, LiveConfig};
use crate::voice::{DEFAULT_FAREWELL_PHRASES, DEFAULT_PENDING_CAPACITY};
use crate::{Error, Result};

/// Seconds between a detected goodbye and the automatic disconnect
pub const DEFAULT_FAREWELL_DELAY_SECS: f64 = 4.0;

/// Live voice client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key (from `GEMINI_API_KEY` or `GOOGLE_API_KEY`)
    pub api_key: Option<SecretString>,

    /// Remote session configuration
    pub session: SessionConfig,

    /// Audio configuration
    pub audio: AudioConfig,

    /// Farewell policy
    pub farewell: FarewellConfig,

    /// Directory holding the prompt override (~/.local/share/devtech/live-voice on Linux)
    pub data_dir: PathBuf,
}

/// Remote session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub voice: String,
    pub endpoint: String,
    pub output_transcription: bool,
}

/// Capture and playback configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Samples per captured frame
    pub frame_size: usize,

    /// Frames held while connecting
    pub pending_capacity: usize,

    /// Gain on every model audio source
    pub output_gain: f32,
}

/// Auto-disconnect configuration
#[derive(Debug, Clone)]
pub struct FarewellConfig {
    pub enabled: bool,
    pub phrases: Vec<String>,
    pub delay: Duration,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is out of range
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file, ignoring the environment
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is out of range
    pub fn from_file(fc: file::LiveVoiceConfigFile) -> Result<Self> {
        Self::from_sources(fc, |_| None)
    }

    /// Merge a parsed file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is out of range
    pub fn from_sources<F>(fc: file::LiveVoiceConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("GOOGLE_API_KEY"))
            .or(fc.api_keys.gemini)
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);

        let session = SessionConfig {
            model: env("LIVE_VOICE_MODEL")
                .or(fc.session.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: env("LIVE_VOICE_VOICE")
                .or(fc.session.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            endpoint: env("LIVE_VOICE_ENDPOINT")
                .or(fc.session.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            output_transcription: fc.session.output_transcription.unwrap_or(true),
        };

        let audio = AudioConfig {
            frame_size: fc.audio.frame_size.unwrap_or(FRAME_SIZE),
            pending_capacity: fc.audio.pending_capacity.unwrap_or(DEFAULT_PENDING_CAPACITY),
            output_gain: fc.audio.output_gain.unwrap_or(1.0),
        };

        if audio.frame_size == 0 {
            return Err(Error::Config("audio.frame_size must be positive".to_string()));
        }
        if !audio.output_gain.is_finite() || audio.output_gain < 0.0 {
            return Err(Error::Config(format!(
                "audio.output_gain must be a non-negative number, got {}",
                audio.output_gain
            )));
        }

        let env_delay = env("LIVE_VOICE_FAREWELL_DELAY")
            .map(|s| {
                s.trim().parse::<f64>().map_err(|e| {
                    Error::Config(format!("LIVE_VOICE_FAREWELL_DELAY={s:?} is not a number: {e}"))
                })
            })
            .transpose()?;
        let delay_secs = env_delay
            .or(fc.farewell.delay_secs)
            .unwrap_or(DEFAULT_FAREWELL_DELAY_SECS);
        let delay = Duration::try_from_secs_f64(delay_secs).map_err(|e| {
            Error::Config(format!("farewell delay {delay_secs} is not a valid duration: {e}"))
        })?;

        let farewell = FarewellConfig {
            enabled: fc.farewell.enabled.unwrap_or(true),
            phrases: fc.farewell.phrases.unwrap_or_else(|| {
                DEFAULT_FAREWELL_PHRASES
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            }),
            delay,
        };

        // ~/.local/share/devtech/live-voice on Linux
        let data_dir = env("LIVE_VOICE_DATA_DIR")
            .or(fc.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        Ok(Self {
            api_key,
            session,
            audio,
            farewell,
            data_dir,
        })
    }

    /// The API key, or a configuration error naming the variable to set
    ///
    /// # Errors
    ///
    /// Returns error if no key was configured
    pub fn require_api_key(&self) -> Result<SecretString> {
        self.api_key.clone().ok_or_else(|| {
            Error::Config("GEMINI_API_KEY is not set (or add [api_keys] gemini to the config file)".to_string())
        })
    }

    /// Microphone settings
    #[must_use]
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            frame_size: self.audio.frame_size,
            ..CaptureConfig::default()
        }
    }

    /// Session parameters for a given behavioral prompt
    #[must_use]
    pub fn live_config(&self, system_instruction: impl Into<String>) -> LiveConfig {
        LiveConfig {
            model: self.session.model.clone(),
            voice: self.session.voice.clone(),
            output_transcription: self.session.output_transcription,
            ..LiveConfig::new(system_instruction)
        }
    }

    /// Settings for a [`crate::SessionController`]
    #[must_use]
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            live: self.live_config(String::new()),
            capture: self.capture_config(),
            output_gain: self.audio.output_gain,
            pending_capacity: self.audio.pending_capacity,
            farewell_phrases: self
                .farewell
                .enabled
                .then(|| self.farewell.phrases.clone()),
            farewell_delay: self.farewell.delay,
        }
    }
}

/// Default data directory for persisted state
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".live-voice"),
        |d| d.data_dir().join("devtech").join("live-voice"),
    )
}
