//! Temporal storage for the engagement pipeline.
//!
//! Two bounded buffers live here:
//! - [`TemporalFeatureStore`]: compact per-tick feature vectors that feed the
//!   fixed-length input windows of the inference modules. Fed on every tick,
//!   calibration included.
//! - [`History`]: the published samples of an active session.
//!
//! Both evict oldest-first once full.

use crate::core::sample::{clamp_unit, BlinkStats, EngagementSample};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use std::sync::Arc;

/// Number of values in a feature vector handed to a model.
pub const FEATURE_LEN: usize = 19;

/// Eye openness below this counts as closed.
pub const EYE_CLOSED_THRESHOLD: f64 = 0.3;

/// Closed runs longer than this are not counted as blinks.
const MAX_BLINK_MS: i64 = 800;

/// Per-tick features retained for temporal modelling.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TemporalFeatures {
    pub timestamp_ms: i64,
    pub face_present: f64,
    pub face_area: f64,
    pub face_cx: f64,
    pub face_cy: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
    pub eye_openness: f64,
    pub gaze_x: f64,
    pub gaze_y: f64,
    pub gaze_speed: f64,
    pub brow_energy: f64,
    pub mouth_energy: f64,
    pub valence: f64,
    pub arousal: f64,
    pub attention: f64,
    pub engagement: f64,
    pub cognitive_load: f64,
    pub fatigue: f64,
}

impl TemporalFeatures {
    /// Extract features from an unadjusted sample.
    pub fn from_sample(sample: &EngagementSample) -> Self {
        let (face_cx, face_cy) = sample.face.center();
        let (gaze_x, gaze_y, gaze_speed) = match sample.gaze {
            Some(g) => (g.x, g.y, g.saccade_speed.unwrap_or(0.0)),
            None => (0.5, 0.5, 0.0),
        };
        Self {
            timestamp_ms: sample.timestamp.timestamp_millis(),
            face_present: if sample.face.detected { 1.0 } else { 0.0 },
            face_area: sample.face.area(),
            face_cx,
            face_cy,
            pitch: sample.posture.head_pose.pitch,
            yaw: sample.posture.head_pose.yaw,
            roll: sample.posture.head_pose.roll,
            eye_openness: sample.facial_activity.eye_openness,
            gaze_x,
            gaze_y,
            gaze_speed,
            brow_energy: sample.facial_activity.brow_energy,
            mouth_energy: sample.facial_activity.mouth_energy,
            valence: sample.emotional_state.valence,
            arousal: sample.emotional_state.arousal,
            attention: sample.attention_level,
            engagement: sample.overall_engagement,
            cognitive_load: sample.cognitive_load,
            fatigue: sample.fatigue_level,
        }
    }

    /// Model-facing vector. Angles are scaled to `[-1,1]`.
    pub fn to_array(&self) -> [f32; FEATURE_LEN] {
        [
            self.face_present as f32,
            self.face_area as f32,
            self.face_cx as f32,
            self.face_cy as f32,
            (self.pitch / 90.0) as f32,
            (self.yaw / 90.0) as f32,
            (self.roll / 90.0) as f32,
            self.eye_openness as f32,
            self.gaze_x as f32,
            self.gaze_y as f32,
            self.gaze_speed as f32,
            self.brow_energy as f32,
            self.mouth_energy as f32,
            self.valence as f32,
            self.arousal as f32,
            self.attention as f32,
            self.engagement as f32,
            self.cognitive_load as f32,
            self.fatigue as f32,
        ]
    }

    pub fn is_padding(&self) -> bool {
        self.timestamp_ms == 0 && self.face_present == 0.0
    }
}

/// Immutable view of the feature store taken at the start of a tick.
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    entries: Arc<[TemporalFeatures]>,
}

impl HistoryWindow {
    pub fn new(entries: Vec<TemporalFeatures>) -> Self {
        Self {
            entries: entries.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `n` real entries, oldest first, without padding.
    pub fn recent(&self, n: usize) -> &[TemporalFeatures] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// Exactly `n` entries, oldest first, zero-padded at the front.
    pub fn tail(&self, n: usize) -> Vec<TemporalFeatures> {
        let recent = self.recent(n);
        let mut padded = vec![TemporalFeatures::default(); n - recent.len()];
        padded.extend_from_slice(recent);
        padded
    }

    pub fn last(&self) -> Option<&TemporalFeatures> {
        self.entries.last()
    }

    /// Values of one feature over the most recent `n` entries.
    pub fn series(&self, n: usize, field: impl Fn(&TemporalFeatures) -> f64) -> Vec<f64> {
        self.recent(n).iter().map(field).collect()
    }
}

/// Fixed-capacity ring of recent feature vectors.
#[derive(Debug)]
pub struct TemporalFeatureStore {
    capacity: usize,
    entries: VecDeque<TemporalFeatures>,
}

impl TemporalFeatureStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, features: TemporalFeatures) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(features);
    }

    pub fn window(&self) -> HistoryWindow {
        HistoryWindow::new(self.entries.iter().copied().collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Session history of published samples.
#[derive(Debug)]
pub struct History {
    capacity: usize,
    samples: VecDeque<Arc<EngagementSample>>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
        }
    }

    /// Append a sample, evicting the oldest if the buffer is full.
    pub fn push(&mut self, sample: Arc<EngagementSample>) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Arc<EngagementSample>> {
        self.samples.back()
    }

    /// Ordered copy of every retained sample, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<EngagementSample>> {
        self.samples.iter().cloned().collect()
    }

    /// Samples no older than `window` before the latest sample.
    pub fn within(&self, window: Duration) -> Vec<Arc<EngagementSample>> {
        let Some(latest) = self.samples.back() else {
            return Vec::new();
        };
        let cutoff = latest.timestamp - window;
        self.samples
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Arithmetic mean, `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().mean()
}

/// Population standard deviation, `0.0` for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().population_std_dev()
}

/// Averages of the five headline scalars.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadlineMetrics {
    pub overall_engagement: f64,
    pub attention_level: f64,
    pub cognitive_load: f64,
    pub fatigue_level: f64,
    pub distraction_probability: f64,
}

impl HeadlineMetrics {
    /// Field-wise mean; all zeros for an empty slice.
    pub fn average(samples: &[Arc<EngagementSample>]) -> Self {
        let field = |f: fn(&EngagementSample) -> f64| -> f64 {
            mean(&samples.iter().map(|s| f(s)).collect::<Vec<_>>())
        };
        Self {
            overall_engagement: field(|s| s.overall_engagement),
            attention_level: field(|s| s.attention_level),
            cognitive_load: field(|s| s.cognitive_load),
            fatigue_level: field(|s| s.fatigue_level),
            distraction_probability: field(|s| s.distraction_probability),
        }
    }
}

/// Blink statistics over a series of `(timestamp_ms, eye_openness)` pairs.
///
/// A blink is a run of closed samples that reopens within [`MAX_BLINK_MS`].
/// Longer closures count toward PERCLOS but not toward the blink rate.
pub fn compute_blink_stats(series: &[(i64, f64)]) -> BlinkStats {
    if series.len() < 2 {
        return BlinkStats::default();
    }

    let mut closed_samples = 0usize;
    let mut blink_durations = Vec::new();
    let mut run_start: Option<i64> = None;

    for &(ts, openness) in series {
        let closed = openness < EYE_CLOSED_THRESHOLD;
        if closed {
            closed_samples += 1;
            if run_start.is_none() {
                run_start = Some(ts);
            }
        } else if let Some(start) = run_start.take() {
            let duration = ts - start;
            if duration > 0 && duration <= MAX_BLINK_MS {
                blink_durations.push(duration as f64);
            }
        }
    }

    let span_ms = (series[series.len() - 1].0 - series[0].0).max(1000);
    let blink_count = blink_durations.len() as u32;

    BlinkStats {
        blink_rate: blink_count as f64 / (span_ms as f64 / 60_000.0),
        avg_blink_duration_ms: mean(&blink_durations),
        blink_count,
        perclos: clamp_unit(closed_samples as f64 / series.len() as f64),
    }
}
