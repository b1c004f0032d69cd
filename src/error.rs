//! Error taxonomy for the engagement pipeline.
//!
//! Only [`InitializationError`] and [`CaptureError`] are fatal to a session.
//! [`InferenceError`] is recovered inside the tick that produced it and
//! [`CalibrationError::InsufficientData`] is a warning.

use crate::config::ConfigError;
use thiserror::Error;

/// Top-level error returned by the public session API.
#[derive(Debug, Error)]
pub enum EngagementError {
    #[error("initialization failed: {0}")]
    Initialization(#[from] InitializationError),

    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Model or profile loading failed while starting a session.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("module `{module}` could not load artifact `{artifact}`: {reason}")]
    ModelUnavailable {
        module: &'static str,
        artifact: &'static str,
        reason: String,
    },

    #[error("cultural profiles could not be loaded: {0}")]
    Profiles(String),

    #[error("analysis thread could not be started: {0}")]
    Scheduler(String),
}

/// Frame source failures.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("frame source could not be opened: {0}")]
    Open(String),

    #[error("frame read failed: {0}")]
    Read(String),

    #[error("frame source disconnected")]
    Disconnected,
}

/// A single module failed on a single tick.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("{module}: model execution failed: {reason}")]
    Model { module: &'static str, reason: String },

    #[error("{module}: expected {expected} outputs, model produced {actual}")]
    Shape {
        module: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{module}: estimator panicked")]
    Panicked { module: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalibrationError {
    #[error("calibration already started for this session")]
    AlreadyStarted,

    #[error("calibration window closed with {collected} samples")]
    InsufficientData { collected: usize },
}
