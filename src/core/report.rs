//! Session report builder.
//!
//! A report summarizes a history slice into averaged headline metrics,
//! event counts and the dominant emotion, stamped with producer metadata so
//! exported reports can be traced back to the service instance that made them.

use crate::core::history::{mean, HeadlineMetrics};
use crate::core::sample::{DistractionEvent, DistractionKind, EmotionTag, EngagementSample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// The current report format version.
pub const REPORT_VERSION: &str = "1.0";

/// The name of this producer.
pub const PRODUCER_NAME: &str = "engagement-monitor";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    /// Unique service instance identifier (UUID)
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportWindow {
    /// First sample time (RFC3339)
    pub start: String,
    /// Last sample time (RFC3339)
    pub end: String,
    pub duration_secs: f64,
}

/// Signal quality over the reported window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportQuality {
    /// Fraction of samples with a detected face
    pub face_presence: f64,
    /// Mean gaze confidence over samples that carried a gaze point
    pub gaze_confidence: f64,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub report_version: String,
    pub subject_id: String,
    pub computed_at_utc: String,
    pub producer: ReportProducer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<ReportWindow>,
    pub sample_count: usize,
    pub averages: HeadlineMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dominant_emotion: Option<EmotionTag>,
    pub emotion_counts: BTreeMap<String, usize>,
    pub critical_event_count: u64,
    pub distraction_event_count: usize,
    pub distraction_time_ms: i64,
    pub distractions_by_kind: BTreeMap<String, usize>,
    pub mean_blink_rate: f64,
    pub mean_perclos: f64,
    pub quality: ReportQuality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cultural_profile: Option<String>,
    pub personal_baseline: bool,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, serde_json::Value>,
}

/// Builds reports on behalf of one service instance.
pub struct ReportBuilder {
    instance_id: Uuid,
    session_id: Option<String>,
}

impl ReportBuilder {
    /// Create a new builder with a unique instance ID.
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            session_id: None,
        }
    }

    /// Use an existing instance ID.
    pub fn with_instance_id(instance_id: Uuid) -> Self {
        Self {
            instance_id,
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: String) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Summarize `samples` (oldest first). Empty input yields a report with
    /// zeroed averages and no window. `closing` is an episode flushed at
    /// session end that no sample carries.
    pub fn build(
        &self,
        subject_id: &str,
        samples: &[Arc<EngagementSample>],
        closing: Option<&DistractionEvent>,
        critical_event_count: u64,
    ) -> SessionReport {
        let computed_at = Utc::now();

        let window = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => Some(report_window(first.timestamp, last.timestamp)),
            _ => None,
        };

        let mut emotion_counts: BTreeMap<String, usize> = BTreeMap::new();
        for sample in samples {
            *emotion_counts
                .entry(sample.emotional_state.primary_emotion.as_str().to_string())
                .or_default() += 1;
        }
        let dominant_emotion = dominant_emotion(samples);

        let mut distractions_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut distraction_event_count = 0;
        let mut distraction_time_ms = 0;
        for event in samples
            .iter()
            .flat_map(|s| &s.distraction_events)
            .chain(closing)
        {
            distraction_event_count += 1;
            distraction_time_ms += event.duration_ms;
            *distractions_by_kind
                .entry(kind_name(event.kind).to_string())
                .or_default() += 1;
        }

        let blink_rates: Vec<f64> = samples.iter().map(|s| s.blink_stats.blink_rate).collect();
        let perclos: Vec<f64> = samples.iter().map(|s| s.blink_stats.perclos).collect();

        let face_presence = if samples.is_empty() {
            0.0
        } else {
            samples.iter().filter(|s| s.face.detected).count() as f64 / samples.len() as f64
        };
        let gaze_confidence = mean(
            &samples
                .iter()
                .filter_map(|s| s.gaze.map(|g| g.confidence))
                .collect::<Vec<_>>(),
        );
        let degraded = samples.is_empty() || face_presence < 0.5;
        let quality = ReportQuality {
            face_presence,
            gaze_confidence,
            degraded,
            notes: if samples.is_empty() {
                Some("No samples in window".to_string())
            } else if degraded {
                Some("Face missing in most samples".to_string())
            } else {
                None
            },
        };

        let latest = samples.last();
        let mut meta = HashMap::new();
        if let Some(ref session_id) = self.session_id {
            meta.insert(
                "session_id".to_string(),
                serde_json::Value::String(session_id.clone()),
            );
        }
        if let Some(requested) = latest.map(|s| &s.cultural_context.requested_tag) {
            meta.insert(
                "requested_cultural_tag".to_string(),
                serde_json::Value::String(requested.clone()),
            );
        }

        SessionReport {
            report_version: REPORT_VERSION.to_string(),
            subject_id: subject_id.to_string(),
            computed_at_utc: computed_at.to_rfc3339(),
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                instance_id: self.instance_id.to_string(),
            },
            window,
            sample_count: samples.len(),
            averages: HeadlineMetrics::average(samples),
            dominant_emotion,
            emotion_counts,
            critical_event_count,
            distraction_event_count,
            distraction_time_ms,
            distractions_by_kind,
            mean_blink_rate: mean(&blink_rates),
            mean_perclos: mean(&perclos),
            quality,
            cultural_profile: latest.map(|s| s.cultural_context.profile.clone()),
            personal_baseline: latest.is_some_and(|s| s.cultural_context.personal_baseline),
            meta,
        }
    }

    /// Build and serialize a report to pretty JSON.
    pub fn build_json(
        &self,
        subject_id: &str,
        samples: &[Arc<EngagementSample>],
        closing: Option<&DistractionEvent>,
        critical_event_count: u64,
    ) -> String {
        let report = self.build(subject_id, samples, closing, critical_event_count);
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn report_window(start: DateTime<Utc>, end: DateTime<Utc>) -> ReportWindow {
    ReportWindow {
        start: start.to_rfc3339(),
        end: end.to_rfc3339(),
        duration_secs: (end - start).num_milliseconds() as f64 / 1000.0,
    }
}

fn kind_name(kind: DistractionKind) -> &'static str {
    match kind {
        DistractionKind::GazeAway => "gaze_away",
        DistractionKind::FaceAbsent => "face_absent",
        DistractionKind::HeadTurned => "head_turned",
        DistractionKind::Drowsiness => "drowsiness",
    }
}

/// Most frequent primary emotion. Ties go to the emotion seen first.
pub fn dominant_emotion(samples: &[Arc<EngagementSample>]) -> Option<EmotionTag> {
    let mut counts: Vec<(EmotionTag, usize)> = Vec::new();
    for sample in samples {
        let tag = sample.emotional_state.primary_emotion;
        match counts.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, n)) => *n += 1,
            None => counts.push((tag, 1)),
        }
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(EmotionTag, usize)>, (tag, n)| match best {
            Some((_, bn)) if bn >= n => best,
            _ => Some((tag, n)),
        })
        .map(|(tag, _)| tag)
}
