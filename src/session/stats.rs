//! Session counters and the stats snapshot handed to callers.
//!
//! Counters are plain atomics bumped by the scheduler thread and read from
//! anywhere. Nothing here holds personal data; it only records how much
//! work the pipeline did and how often it had to recover.

use crate::calibration::CalibrationState;
use crate::inference::ModuleStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of a tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    /// Ended by `stop()` or drop
    Stopped,
    /// Ended by capture loss or a panic in the loop
    Failed,
}

/// Work and recovery counters for one session.
#[derive(Debug)]
pub struct SessionCounters {
    /// Loop iterations, including skipped ones
    ticks: AtomicU64,
    /// Frames pulled and processed
    frames: AtomicU64,
    /// Ticks where the source had no frame ready
    skipped: AtomicU64,
    /// Frame read failures
    capture_errors: AtomicU64,
    /// Module failures replaced by a neutral reading
    inference_errors: AtomicU64,
    /// Ticks that overran the interval
    deferred_ticks: AtomicU64,
    critical_events: AtomicU64,
    distraction_events: AtomicU64,
    /// Samples delivered to observers
    published: AtomicU64,
    started_at: DateTime<Utc>,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            capture_errors: AtomicU64::new(0),
            inference_errors: AtomicU64::new(0),
            deferred_ticks: AtomicU64::new(0),
            critical_events: AtomicU64::new(0),
            distraction_events: AtomicU64::new(0),
            published: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_error(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference_error(&self) {
        self.inference_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred_tick(&self) {
        self.deferred_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_critical_events(&self, count: u64) {
        self.critical_events.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_distraction_events(&self, count: u64) {
        self.distraction_events.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn critical_event_count(&self) -> u64 {
        self.critical_events.load(Ordering::Relaxed)
    }

    /// Get the current values. `dropped_events` is left at zero; the
    /// session fills it in from its observers.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            deferred_ticks: self.deferred_ticks.load(Ordering::Relaxed),
            critical_events: self.critical_events.load(Ordering::Relaxed),
            distraction_events: self.distraction_events.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            dropped_events: 0,
            session_start: self.started_at,
            session_duration_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Frames processed: {}\n\
             - Ticks skipped (no frame): {}\n\
             - Ticks deferred (overrun): {}\n\
             - Capture errors: {}\n\
             - Inference errors recovered: {}\n\
             - Critical events: {}\n\
             - Distraction events: {}\n\
             - Samples published: {}\n\
             - Session duration: {} seconds",
            s.frames,
            s.skipped,
            s.deferred_ticks,
            s.capture_errors,
            s.inference_errors,
            s.critical_events,
            s.distraction_events,
            s.published,
            s.session_duration_secs
        )
    }
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the session counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub ticks: u64,
    pub frames: u64,
    pub skipped: u64,
    pub capture_errors: u64,
    pub inference_errors: u64,
    pub deferred_ticks: u64,
    pub critical_events: u64,
    pub distraction_events: u64,
    pub published: u64,
    /// Events dropped by full subscriber channels
    pub dropped_events: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub models_loaded: usize,
    pub models: Vec<ModuleStatus>,
    pub calibration_state: CalibrationState,
    pub session_state: SessionState,
    pub history_size: usize,
    pub counters: CounterSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let counters = SessionCounters::new();
        counters.record_frame();
        counters.record_frame();
        counters.record_inference_error();
        counters.record_critical_events(3);

        let s = counters.snapshot();
        assert_eq!(s.frames, 2);
        assert_eq!(s.inference_errors, 1);
        assert_eq!(s.critical_events, 3);
        assert_eq!(counters.critical_event_count(), 3);
        assert_eq!(s.dropped_events, 0);
    }

    #[test]
    fn test_summary_format() {
        let counters = SessionCounters::new();
        let summary = counters.summary();
        assert!(summary.contains("Frames processed: 0"));
        assert!(summary.contains("Inference errors recovered"));
    }
}
