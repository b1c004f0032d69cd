//! Critical event rules over published samples.

use crate::core::sample::{EngagementSample, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rule thresholds. Every comparison is strict: a value equal to the
/// threshold does not fire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventThresholds {
    pub high_fatigue: f64,
    pub low_attention: f64,
    pub cognitive_overload: f64,
}

impl Default for EventThresholds {
    fn default() -> Self {
        Self {
            high_fatigue: 0.8,
            low_attention: 0.3,
            cognitive_overload: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalEventKind {
    HighFatigue,
    LowAttention,
    CognitiveOverload,
}

impl CriticalEventKind {
    pub fn severity(&self) -> Severity {
        match self {
            CriticalEventKind::HighFatigue | CriticalEventKind::CognitiveOverload => Severity::High,
            CriticalEventKind::LowAttention => Severity::Medium,
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            CriticalEventKind::HighFatigue => "take a break now",
            CriticalEventKind::LowAttention => "adjust the content or switch activity",
            CriticalEventKind::CognitiveOverload => "reduce the complexity of the material",
        }
    }
}

/// One fired rule for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalEvent {
    pub kind: CriticalEventKind,
    pub severity: Severity,
    pub suggestion: String,
    /// Observed value that crossed the threshold
    pub value: f64,
    pub threshold: f64,
    pub sample_timestamp: DateTime<Utc>,
    pub sample_sequence: u64,
}

/// Evaluate every rule against a sample. Each rule fires at most once.
pub fn detect(sample: &EngagementSample, thresholds: &EventThresholds) -> Vec<CriticalEvent> {
    let rules = [
        (
            CriticalEventKind::HighFatigue,
            sample.fatigue_level,
            thresholds.high_fatigue,
            sample.fatigue_level > thresholds.high_fatigue,
        ),
        (
            CriticalEventKind::LowAttention,
            sample.attention_level,
            thresholds.low_attention,
            sample.attention_level < thresholds.low_attention,
        ),
        (
            CriticalEventKind::CognitiveOverload,
            sample.cognitive_load,
            thresholds.cognitive_overload,
            sample.cognitive_load > thresholds.cognitive_overload,
        ),
    ];

    rules
        .into_iter()
        .filter(|(_, _, _, fired)| *fired)
        .map(|(kind, value, threshold, _)| CriticalEvent {
            kind,
            severity: kind.severity(),
            suggestion: kind.suggestion().to_string(),
            value,
            threshold,
            sample_timestamp: sample.timestamp,
            sample_sequence: sample.sequence,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sample::fixtures;

    fn kinds(sample: &EngagementSample) -> Vec<CriticalEventKind> {
        detect(sample, &EventThresholds::default())
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    #[test]
    fn test_fatigue_boundary_is_strict() {
        let mut sample = fixtures::sample("s", Utc::now());
        sample.fatigue_level = 0.81;
        assert_eq!(kinds(&sample), vec![CriticalEventKind::HighFatigue]);
        sample.fatigue_level = 0.79;
        assert!(kinds(&sample).is_empty());
        sample.fatigue_level = 0.8;
        assert!(kinds(&sample).is_empty());
    }

    #[test]
    fn test_attention_and_load_boundaries() {
        let mut sample = fixtures::sample("s", Utc::now());
        sample.attention_level = 0.3;
        sample.cognitive_load = 0.9;
        assert!(kinds(&sample).is_empty());

        sample.attention_level = 0.29;
        sample.cognitive_load = 0.91;
        assert_eq!(
            kinds(&sample),
            vec![
                CriticalEventKind::LowAttention,
                CriticalEventKind::CognitiveOverload
            ]
        );
    }

    #[test]
    fn test_multiple_rules_fire_independently() {
        let mut sample = fixtures::sample("s", Utc::now());
        sample.fatigue_level = 0.95;
        sample.attention_level = 0.1;
        sample.cognitive_load = 0.99;
        let events = detect(&sample, &EventThresholds::default());
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].severity, Severity::High);
        assert_eq!(events[1].severity, Severity::Medium);
        assert!((events[1].value - 0.1).abs() < 1e-12);
        assert!(events.iter().all(|e| e.sample_timestamp == sample.timestamp));
    }

    #[test]
    fn test_custom_thresholds() {
        let mut sample = fixtures::sample("s", Utc::now());
        sample.fatigue_level = 0.5;
        let thresholds = EventThresholds {
            high_fatigue: 0.4,
            ..EventThresholds::default()
        };
        assert_eq!(detect(&sample, &thresholds).len(), 1);
    }
}
