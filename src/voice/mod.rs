//! Voice pipeline
//!
//! Microphone capture, gapless playback scheduling, barge-in and the
//! farewell policy. The session controller wires these together.

mod barge_in;
mod capture;
mod farewell;
mod playback;
mod queue;

pub use barge_in::InterruptionHandler;
pub use capture::CapturePipeline;
pub use farewell::{DEFAULT_FAREWELL_PHRASES, FarewellDetector};
pub use playback::{PlaybackScheduler, ScheduledFragment};
pub use queue::{DEFAULT_PENDING_CAPACITY, PendingFrames};
