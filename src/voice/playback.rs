//! Gapless playback scheduling for streamed model audio
//!
//! Fragments are decoded and started back to back on the output clock. The
//! cursor always points at the end of the last scheduled fragment, so audio
//! arriving in order plays in order with no gap and no overlap while the
//! output keeps up. When playback has fallen behind, the next fragment starts
//! "now" instead of in the past.

use std::collections::BTreeSet;

use crate::audio::{AudioOutput, OUTPUT_SAMPLE_RATE, SourceId, decode_fragment};
use crate::Result;

/// Where a fragment landed on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledFragment {
    pub id: SourceId,
    /// Start time in seconds on the output clock
    pub start: f64,
    /// Length in seconds
    pub duration: f64,
}

impl ScheduledFragment {
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Owns the playback cursor and the set of sounding sources
pub struct PlaybackScheduler {
    output: Option<Box<dyn AudioOutput>>,
    cursor: f64,
    active: BTreeSet<SourceId>,
    next_id: SourceId,
    sample_rate: u32,
}

impl PlaybackScheduler {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_sample_rate(OUTPUT_SAMPLE_RATE)
    }

    #[must_use]
    pub const fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            output: None,
            cursor: 0.0,
            active: BTreeSet::new(),
            next_id: 1,
            sample_rate,
        }
    }

    /// Attach a freshly opened output, replacing (and closing) any previous one
    pub fn attach(&mut self, output: Box<dyn AudioOutput>) {
        self.shutdown();
        self.sample_rate = output.sample_rate();
        self.output = Some(output);
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.output.as_ref().is_some_and(|output| !output.is_closed())
    }

    /// Decode a base64 fragment and schedule it right after the previous one
    ///
    /// Returns `Ok(None)` without touching any state when the output has
    /// already been torn down.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Decode`] for a malformed fragment (the cursor is
    /// not advanced) or an audio error if the output rejects the source
    pub fn schedule(&mut self, fragment: &str) -> Result<Option<ScheduledFragment>> {
        let buffer = decode_fragment(fragment, self.sample_rate)?;

        let Some(output) = self.output.as_mut().filter(|output| !output.is_closed()) else {
            tracing::debug!("output torn down, fragment ignored");
            return Ok(None);
        };

        let start = self.cursor.max(output.current_time());
        let duration = buffer.duration();
        let id = self.next_id;

        output.start_source(id, buffer, start)?;

        self.next_id += 1;
        self.active.insert(id);
        self.cursor = start + duration;

        tracing::trace!(id, start, duration, active = self.active.len(), "fragment scheduled");

        Ok(Some(ScheduledFragment {
            id,
            start,
            duration,
        }))
    }

    /// Bookkeeping for a source that played to completion
    ///
    /// Returns `true` when this was the last sounding source.
    pub fn on_source_ended(&mut self, id: SourceId) -> bool {
        self.active.remove(&id) && self.active.is_empty()
    }

    /// Stop every sounding source and rewind the cursor to zero
    ///
    /// Returns the number of sources stopped.
    pub fn flush(&mut self) -> usize {
        let stopped = self.active.len();
        if let Some(output) = self.output.as_mut() {
            for &id in &self.active {
                output.stop_source(id);
            }
        }
        self.active.clear();
        self.cursor = 0.0;
        stopped
    }

    /// Flush, then close and detach the output. Idempotent.
    pub fn shutdown(&mut self) {
        self.flush();
        if let Some(mut output) = self.output.take() {
            output.close();
            tracing::debug!("playback output closed");
        }
    }

    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.cursor
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }

    /// Output clock, or zero when detached
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.output.as_ref().map_or(0.0, |output| output.current_time())
    }
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}
