//! Engagement Monitor - real-time learner engagement inference.
//!
//! This library turns a stream of camera frames into a per-tick estimate of
//! a learner's engagement, attention, cognitive load, fatigue and emotional
//! state. Estimates are calibrated against a cultural profile and a personal
//! baseline, retained in a bounded history and published to observers.
//!
//! # Guarantees
//!
//! - **Bounded**: every scalar in `[0,1]`, every buffer capped
//! - **Non-fatal inference**: a failing module yields its neutral reading
//! - **Deterministic**: the same frames produce the same fused output
//! - **Clean shutdown**: stop returns after the in-flight tick and releases
//!   the frame source
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Tracking Session                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌─────────┐  │
//! │  │   Frame    │──▶│    Face    │──▶│  Emotion   │──▶│ Fusion  │  │
//! │  │   Source   │   │  Detector  │   │ Gaze, ...  │   │         │  │
//! │  └────────────┘   └────────────┘   └────────────┘   └─────────┘  │
//! │                                                          │       │
//! │                                                          ▼       │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌─────────┐  │
//! │  │ Observers  │◀──│  History   │◀──│  Critical  │◀──│ Calib-  │  │
//! │  │            │   │  Heatmap   │   │   Events   │   │ ration  │  │
//! │  └────────────┘   └────────────┘   └────────────┘   └─────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use engagement_monitor::{Config, EngagementService, NoModelStore, SyntheticFrameSource};
//! use std::sync::Arc;
//!
//! let service = EngagementService::new(Config::default(), Arc::new(NoModelStore));
//! let session = service
//!     .start_tracking(Box::new(SyntheticFrameSource::with_seed(1)), "learner-1", "general")
//!     .expect("session start");
//!
//! let events = session.subscribe();
//! if let Ok(event) = events.recv() {
//!     println!("{event:?}");
//! }
//! session.stop();
//! ```

pub mod calibration;
pub mod config;
pub mod core;
pub mod error;
pub mod inference;
pub mod model;
pub mod session;
pub mod source;

// Re-export key types at crate root for convenience
pub use calibration::{Calibration, CalibrationState, CulturalCalibrationProfile};
pub use config::{Config, ConfigError, HeatmapConfig, ScreenSize};
pub use crate::core::{
    AttentionHeatmap, CriticalEvent, CriticalEventKind, EngagementSample, SessionReport,
};
pub use error::{CalibrationError, CaptureError, EngagementError, InferenceError, InitializationError};
pub use model::{InferenceModel, ModelPolicy, ModelStore, NoModelStore, StaticModelStore};
pub use session::{
    ChannelObserver, EngagementObserver, EngagementService, ServiceStats, SessionEndReason,
    SessionEvent, SessionState, TrackingSession,
};
pub use source::{Frame, FrameSource, SyntheticConfig, SyntheticFrameSource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
