//! Behavioral prompt storage
//!
//! The prompt sent at session setup can be overridden by the user. The
//! override is a single value under a namespaced key; removing it (or saving
//! something blank) brings back the built-in prompt.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::{Error, Result};

/// Built-in behavioral prompt
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = include_str!("../prompts/system_instruction.md");

/// Namespaced key of the override
pub const STORAGE_KEY: &str = "devtech_system_instruction";

/// Get, override and reset the behavioral prompt
pub trait PromptStore: Send + Sync {
    /// The override if one is set, otherwise the built-in prompt
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be read
    fn get(&self) -> Result<String>;

    /// Replace the override
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be written
    fn set(&self, instruction: &str) -> Result<()>;

    /// Remove the override
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be written
    fn reset(&self) -> Result<()>;

    /// Whether a non-blank override is set
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be read
    fn is_overridden(&self) -> Result<bool>;
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Override persisted as a UTF-8 file named after [`STORAGE_KEY`]
#[derive(Debug, Clone)]
pub struct FilePromptStore {
    path: PathBuf,
}

impl FilePromptStore {
    /// Store inside `data_dir`
    #[must_use]
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(STORAGE_KEY),
        }
    }

    /// Location of the override file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(non_blank(Some(content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Prompt(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }
}

impl PromptStore for FilePromptStore {
    fn get(&self) -> Result<String> {
        Ok(self
            .read()?
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()))
    }

    fn set(&self, instruction: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, instruction).map_err(|e| {
            Error::Prompt(format!("failed to write {}: {e}", self.path.display()))
        })?;

        tracing::info!(path = %self.path.display(), chars = instruction.chars().count(), "prompt override saved");
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "prompt override removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Prompt(format!(
                "failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn is_overridden(&self) -> Result<bool> {
        Ok(self.read()?.is_some())
    }
}

/// In-process store, nothing persisted
#[derive(Debug, Default)]
pub struct MemoryPromptStore {
    value: Mutex<Option<String>>,
}

impl MemoryPromptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an override already set
    #[must_use]
    pub fn with_override(instruction: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(instruction.into())),
        }
    }

    fn current(&self) -> Option<String> {
        let value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        non_blank(value.clone())
    }
}

impl PromptStore for MemoryPromptStore {
    fn get(&self) -> Result<String> {
        Ok(self
            .current()
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()))
    }

    fn set(&self, instruction: &str) -> Result<()> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(instruction.to_string());
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn is_overridden(&self) -> Result<bool> {
        Ok(self.current().is_some())
    }
}
