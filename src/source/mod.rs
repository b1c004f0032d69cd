//! Frame acquisition for the engagement monitor.
//!
//! Camera capture lives outside this crate. The pipeline pulls frames through
//! the [`FrameSource`] trait; [`SyntheticFrameSource`] renders a deterministic
//! face-like stream for demos and tests.

pub mod synthetic;
pub mod types;

pub use synthetic::{SyntheticConfig, SyntheticFrameSource};
pub use types::{Frame, FrameCrop};

use crate::error::CaptureError;

/// Pull interface over a stream of timestamped frames.
///
/// The session opens the source once in `start_tracking`, pulls one frame per
/// tick from the scheduler thread and closes it on every exit path.
pub trait FrameSource: Send {
    /// Acquire the underlying device or stream.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Pull the next frame.
    ///
    /// `Ok(None)` means no frame is ready this tick; the tick is skipped.
    /// [`CaptureError::Disconnected`] ends the session.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Release the underlying device. Must be safe to call more than once.
    fn close(&mut self);

    /// Human-readable name used in logs.
    fn describe(&self) -> String {
        "frame source".to_string()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> Result<(), CaptureError> {
        (**self).open()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
