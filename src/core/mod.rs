//! Core data and temporal machinery of the engagement pipeline.
//!
//! This module contains:
//! - The engagement data model
//! - Bounded temporal buffers (feature store, history, gaze trail)
//! - Distraction tracking and critical-event rules
//! - Heatmap synthesis and session reports

pub mod distraction;
pub mod events;
pub mod gaze_trail;
pub mod heatmap;
pub mod history;
pub mod report;
pub mod sample;

// Re-export commonly used types
pub use distraction::{DistractionConfig, DistractionTracker, TickObservation};
pub use events::{detect as detect_critical_events, CriticalEvent, CriticalEventKind, EventThresholds};
pub use gaze_trail::{GazeClassifierConfig, GazeTrail};
pub use heatmap::{AttentionHeatmap, HeatmapWindow};
pub use history::{
    compute_blink_stats, mean, std_dev, HeadlineMetrics, History, HistoryWindow,
    TemporalFeatureStore, TemporalFeatures, FEATURE_LEN,
};
pub use report::{ReportBuilder, SessionReport, PRODUCER_NAME, REPORT_VERSION};
pub use sample::*;
