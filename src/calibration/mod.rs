//! Cultural and personal calibration.
//!
//! - [`profiles`]: the process-wide cultural profile table
//! - [`baseline`]: the per-session calibrator and personal baseline
//! - [`adjust`]: the pure adjustment applied to every fused sample

pub mod adjust;
pub mod baseline;
pub mod profiles;

pub use adjust::{adjust, AdjustmentCoefficients};
pub use baseline::{Calibration, CalibrationState, Calibrator, PersonalBaseline};
pub use profiles::{
    normalize_tag, CulturalCalibrationProfile, CulturalProfileTable, DEFAULT_PROFILE,
};
