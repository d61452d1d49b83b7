//! Barge-in handling
//!
//! When the remote model reports that the user talked over it, everything
//! still queued on the speaker is stale and must go immediately.

use super::playback::PlaybackScheduler;

/// Flushes playback on interruption and keeps a tally
#[derive(Debug, Default)]
pub struct InterruptionHandler {
    interruptions: u64,
}

impl InterruptionHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self { interruptions: 0 }
    }

    /// Stop every sounding source and rewind the cursor
    ///
    /// Returns the number of sources cut off.
    pub fn interrupt(&mut self, playback: &mut PlaybackScheduler) -> usize {
        let stopped = playback.flush();
        self.interruptions += 1;

        tracing::info!(
            stopped,
            total = self.interruptions,
            "model interrupted, playback flushed"
        );

        stopped
    }

    /// Interruptions handled so far
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.interruptions
    }
}
