//! Personal baseline and the per-session calibration state machine.

use super::profiles::{CulturalCalibrationProfile, CulturalProfileTable};
use crate::core::history::{mean, HeadlineMetrics};
use crate::core::sample::{EmotionTag, EngagementSample, Leaning};
use crate::error::CalibrationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Field-wise mean of the calibration-phase samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalBaseline {
    pub sample_count: usize,
    pub overall_engagement: f64,
    pub attention_level: f64,
    pub cognitive_load: f64,
    pub fatigue_level: f64,
    pub distraction_probability: f64,
    pub emotion_intensity: f64,
    pub valence: f64,
    pub arousal: f64,
    pub ergonomic_score: f64,
    pub blink_rate: f64,
    pub perclos: f64,
    /// Taken from the first sample
    pub primary_emotion: EmotionTag,
    /// Taken from the first sample
    pub leaning: Leaning,
}

impl PersonalBaseline {
    /// Average the samples. `None` when there are none.
    pub fn from_samples(samples: &[Arc<EngagementSample>]) -> Option<Self> {
        let first = samples.first()?;
        let avg = |f: fn(&EngagementSample) -> f64| -> f64 {
            mean(&samples.iter().map(|s| f(s)).collect::<Vec<_>>())
        };
        let headline = HeadlineMetrics::average(samples);

        Some(Self {
            sample_count: samples.len(),
            overall_engagement: headline.overall_engagement,
            attention_level: headline.attention_level,
            cognitive_load: headline.cognitive_load,
            fatigue_level: headline.fatigue_level,
            distraction_probability: headline.distraction_probability,
            emotion_intensity: avg(|s| s.emotional_state.intensity),
            valence: avg(|s| s.emotional_state.valence),
            arousal: avg(|s| s.emotional_state.arousal),
            ergonomic_score: avg(|s| s.posture.ergonomic_score),
            blink_rate: avg(|s| s.blink_stats.blink_rate),
            perclos: avg(|s| s.blink_stats.perclos),
            primary_emotion: first.emotional_state.primary_emotion,
            leaning: first.posture.leaning,
        })
    }

    /// A baseline carrying only headline levels.
    pub fn from_headline(headline: HeadlineMetrics) -> Self {
        Self {
            sample_count: 0,
            overall_engagement: headline.overall_engagement,
            attention_level: headline.attention_level,
            cognitive_load: headline.cognitive_load,
            fatigue_level: headline.fatigue_level,
            distraction_probability: headline.distraction_probability,
            emotion_intensity: 0.0,
            valence: 0.0,
            arousal: 0.3,
            ergonomic_score: 0.5,
            blink_rate: 0.0,
            perclos: 0.0,
            primary_emotion: EmotionTag::Neutral,
            leaning: Leaning::Upright,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationState {
    Uninitialized,
    Calibrating,
    Calibrated,
}

/// The active calibration of a session. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub requested_tag: String,
    pub profile: CulturalCalibrationProfile,
    /// Unset when the calibration window produced no samples
    pub baseline: Option<PersonalBaseline>,
    pub completed_at: DateTime<Utc>,
}

/// Drives `Uninitialized -> Calibrating -> Calibrated` for one session.
///
/// The window is measured in frame time: it opens at the first frame seen
/// after `begin` and closes once a frame at or beyond `duration` arrives.
#[derive(Debug)]
pub struct Calibrator {
    state: CalibrationState,
    duration: Duration,
    requested_tag: String,
    profile: Option<CulturalCalibrationProfile>,
    window_start: Option<DateTime<Utc>>,
    buffer: Vec<Arc<EngagementSample>>,
    calibration: Option<Arc<Calibration>>,
}

impl Calibrator {
    pub fn new(duration: std::time::Duration) -> Self {
        Self {
            state: CalibrationState::Uninitialized,
            duration: Duration::from_std(duration).unwrap_or_else(|_| Duration::seconds(30)),
            requested_tag: String::new(),
            profile: None,
            window_start: None,
            buffer: Vec::new(),
            calibration: None,
        }
    }

    /// Load the cultural profile and open the calibration phase.
    pub fn begin(
        &mut self,
        cultural_tag: &str,
        table: &CulturalProfileTable,
    ) -> Result<(), CalibrationError> {
        if self.state != CalibrationState::Uninitialized {
            return Err(CalibrationError::AlreadyStarted);
        }
        let (profile, matched) = table.resolve(cultural_tag);
        if !matched {
            warn!(
                requested = cultural_tag,
                "Unknown cultural tag, using `{}` profile", profile.tag
            );
        }
        self.requested_tag = cultural_tag.to_string();
        self.profile = Some(profile.clone());
        self.state = CalibrationState::Calibrating;
        info!(profile = %profile.tag, "Calibration started");
        Ok(())
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn requested_tag(&self) -> &str {
        &self.requested_tag
    }

    /// Profile in effect; available from `begin` onward.
    pub fn profile(&self) -> Option<&CulturalCalibrationProfile> {
        self.profile.as_ref()
    }

    pub fn calibration(&self) -> Option<&Arc<Calibration>> {
        self.calibration.as_ref()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Advance the frame clock. Returns `true` while the tick at `now`
    /// belongs to the calibration phase. Closes the window when it has elapsed.
    pub fn advance(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != CalibrationState::Calibrating {
            return false;
        }
        let start = *self.window_start.get_or_insert(now);
        if now - start >= self.duration {
            self.finish(now);
            return false;
        }
        true
    }

    /// Buffer a calibration-phase sample. Ignored outside the phase.
    pub fn record(&mut self, sample: Arc<EngagementSample>) {
        if self.state == CalibrationState::Calibrating {
            self.buffer.push(sample);
        }
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        let baseline = match PersonalBaseline::from_samples(&self.buffer) {
            Some(baseline) => {
                info!(
                    samples = baseline.sample_count,
                    attention = baseline.attention_level,
                    engagement = baseline.overall_engagement,
                    "Calibration complete"
                );
                Some(baseline)
            }
            None => {
                let err = CalibrationError::InsufficientData { collected: 0 };
                warn!("{err}; continuing with cultural adjustment only");
                None
            }
        };

        let profile = self
            .profile
            .clone()
            .unwrap_or_else(|| CulturalProfileTable::builtin().lookup("general").clone());

        self.calibration = Some(Arc::new(Calibration {
            requested_tag: self.requested_tag.clone(),
            profile,
            baseline,
            completed_at: now,
        }));
        self.buffer = Vec::new();
        self.state = CalibrationState::Calibrated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sample::fixtures;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn started(duration_ms: u64) -> Calibrator {
        let mut calibrator = Calibrator::new(std::time::Duration::from_millis(duration_ms));
        calibrator
            .begin("western", &CulturalProfileTable::builtin())
            .unwrap();
        calibrator
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut calibrator = started(1000);
        assert_eq!(
            calibrator.begin("nordic", &CulturalProfileTable::builtin()),
            Err(CalibrationError::AlreadyStarted)
        );
        assert_eq!(calibrator.profile().unwrap().tag, "western");
    }

    #[test]
    fn test_window_closes_in_frame_time() {
        let mut calibrator = started(1000);
        let mut ms = 0;
        while calibrator.advance(at(ms)) {
            let mut sample = fixtures::sample("s", at(ms));
            sample.attention_level = if ms < 500 { 0.4 } else { 0.6 };
            if ms == 0 {
                sample.emotional_state.primary_emotion = EmotionTag::Focused;
            }
            calibrator.record(Arc::new(sample));
            ms += 100;
        }
        assert_eq!(ms, 1000);
        assert_eq!(calibrator.state(), CalibrationState::Calibrated);

        let calibration = calibrator.calibration().unwrap();
        let baseline = calibration.baseline.as_ref().unwrap();
        assert_eq!(baseline.sample_count, 10);
        assert!((baseline.attention_level - 0.5).abs() < 1e-12);
        assert_eq!(baseline.primary_emotion, EmotionTag::Focused);
        assert_eq!(calibration.requested_tag, "western");
    }

    #[test]
    fn test_calibration_is_computed_once() {
        let mut calibrator = started(0);
        assert!(!calibrator.advance(at(0)));
        let first = Arc::clone(calibrator.calibration().unwrap());

        calibrator.record(Arc::new(fixtures::sample("s", at(100))));
        assert!(!calibrator.advance(at(100)));
        assert!(Arc::ptr_eq(&first, calibrator.calibration().unwrap()));
        assert_eq!(calibrator.buffered(), 0);
    }

    #[test]
    fn test_zero_samples_leaves_baseline_unset() {
        let mut calibrator = started(0);
        calibrator.advance(at(0));
        let calibration = calibrator.calibration().unwrap();
        assert!(calibration.baseline.is_none());
        assert_eq!(calibration.profile.tag, "western");
    }

    #[test]
    fn test_baseline_from_empty_is_none() {
        assert!(PersonalBaseline::from_samples(&[]).is_none());
    }
}
