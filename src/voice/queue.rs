//! Bounded holding queue for frames captured before the session is ready

use std::collections::VecDeque;

use crate::audio::EncodedBlob;

/// Default number of frames held (about 8 seconds of 4096-sample frames)
pub const DEFAULT_PENDING_CAPACITY: usize = 32;

/// FIFO of encoded frames that drops the oldest entry when full
#[derive(Debug)]
pub struct PendingFrames {
    frames: VecDeque<EncodedBlob>,
    capacity: usize,
    dropped: u64,
}

impl PendingFrames {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Queue a frame, evicting the oldest one on overflow
    pub fn push(&mut self, blob: EncodedBlob) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
            self.dropped += 1;
            tracing::trace!(dropped = self.dropped, "pending queue full, oldest frame dropped");
        }
        self.frames.push_back(blob);
    }

    /// Take every queued frame, oldest first
    pub fn drain(&mut self) -> impl Iterator<Item = EncodedBlob> + '_ {
        self.frames.drain(..)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames evicted since creation
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for PendingFrames {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CAPACITY)
    }
}
