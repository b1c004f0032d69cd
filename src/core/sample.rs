//! Engagement data model.
//!
//! Every probability-like field is kept in `[0,1]` by [`clamp_unit`]; valence
//! lives in `[-1,1]` and head angles in `[-90,90]` degrees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Clamp into `[0,1]`, mapping NaN to zero.
#[inline]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Clamp into `[-1,1]`, mapping NaN to zero.
#[inline]
pub fn clamp_signed(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// Clamp a head angle into `[-90,90]` degrees.
#[inline]
pub fn clamp_angle(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-90.0, 90.0)
    }
}

/// Emotion categories produced by the emotion classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionTag {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Surprised,
    Disgusted,
    Contempt,
    Confused,
    Frustrated,
    Bored,
    Interested,
    Focused,
}

impl EmotionTag {
    /// Classifier output order.
    pub const ALL: [EmotionTag; 13] = [
        EmotionTag::Neutral,
        EmotionTag::Happy,
        EmotionTag::Sad,
        EmotionTag::Angry,
        EmotionTag::Fearful,
        EmotionTag::Surprised,
        EmotionTag::Disgusted,
        EmotionTag::Contempt,
        EmotionTag::Confused,
        EmotionTag::Frustrated,
        EmotionTag::Bored,
        EmotionTag::Interested,
        EmotionTag::Focused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionTag::Neutral => "neutral",
            EmotionTag::Happy => "happy",
            EmotionTag::Sad => "sad",
            EmotionTag::Angry => "angry",
            EmotionTag::Fearful => "fearful",
            EmotionTag::Surprised => "surprised",
            EmotionTag::Disgusted => "disgusted",
            EmotionTag::Contempt => "contempt",
            EmotionTag::Confused => "confused",
            EmotionTag::Frustrated => "frustrated",
            EmotionTag::Bored => "bored",
            EmotionTag::Interested => "interested",
            EmotionTag::Focused => "focused",
        }
    }

    /// Prototype (valence, arousal) coordinates.
    pub fn circumplex(&self) -> (f64, f64) {
        match self {
            EmotionTag::Neutral => (0.0, 0.3),
            EmotionTag::Happy => (0.8, 0.6),
            EmotionTag::Sad => (-0.7, 0.2),
            EmotionTag::Angry => (-0.7, 0.85),
            EmotionTag::Fearful => (-0.6, 0.8),
            EmotionTag::Surprised => (0.2, 0.9),
            EmotionTag::Disgusted => (-0.75, 0.55),
            EmotionTag::Contempt => (-0.5, 0.4),
            EmotionTag::Confused => (-0.25, 0.55),
            EmotionTag::Frustrated => (-0.55, 0.7),
            EmotionTag::Bored => (-0.3, 0.1),
            EmotionTag::Interested => (0.45, 0.6),
            EmotionTag::Focused => (0.25, 0.5),
        }
    }

    /// How strongly the emotion signals engagement with the material.
    pub fn engagement_weight(&self) -> f64 {
        match self {
            EmotionTag::Interested | EmotionTag::Focused => 1.0,
            EmotionTag::Happy | EmotionTag::Surprised => 0.8,
            EmotionTag::Confused => 0.6,
            EmotionTag::Neutral => 0.5,
            EmotionTag::Frustrated | EmotionTag::Fearful => 0.35,
            EmotionTag::Angry | EmotionTag::Disgusted | EmotionTag::Contempt => 0.25,
            EmotionTag::Sad => 0.2,
            EmotionTag::Bored => 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalState {
    pub primary_emotion: EmotionTag,
    pub secondary_emotion: Option<EmotionTag>,
    pub intensity: f64,
    /// Pleasantness in `[-1,1]`
    pub valence: f64,
    pub arousal: f64,
    pub confidence: f64,
    pub culturally_adjusted: bool,
}

impl Default for EmotionalState {
    fn default() -> Self {
        Self {
            primary_emotion: EmotionTag::Neutral,
            secondary_emotion: None,
            intensity: 0.0,
            valence: 0.0,
            arousal: 0.3,
            confidence: 0.0,
            culturally_adjusted: false,
        }
    }
}

/// A screen-normalized gaze estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazePoint {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: i64,
    pub confidence: f64,
    /// Set when the point is part of a fixation
    pub fixation_duration_ms: Option<f64>,
    /// Set when the point is a saccade, in screen-widths per second
    pub saccade_speed: Option<f64>,
}

impl GazePoint {
    pub fn new(x: f64, y: f64, timestamp_ms: i64, confidence: f64) -> Self {
        Self {
            x: clamp_unit(x),
            y: clamp_unit(y),
            timestamp_ms,
            confidence: clamp_unit(confidence),
            fixation_duration_ms: None,
            saccade_speed: None,
        }
    }

    pub fn is_saccade(&self) -> bool {
        self.saccade_speed.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistractionKind {
    GazeAway,
    FaceAbsent,
    HeadTurned,
    Drowsiness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistractionEvent {
    /// When the distraction started
    pub timestamp: DateTime<Utc>,
    pub kind: DistractionKind,
    pub duration_ms: i64,
    pub severity: Severity,
    pub impact: f64,
    /// Time from the end of the distraction until attention recovered
    pub recovery_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
    pub stability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leaning {
    #[default]
    Upright,
    Forward,
    Backward,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostureMetrics {
    pub head_pose: HeadPose,
    pub shoulder_alignment: f64,
    pub spinal_posture: f64,
    pub leaning: Leaning,
    pub ergonomic_score: f64,
}

impl Default for PostureMetrics {
    fn default() -> Self {
        Self {
            head_pose: HeadPose {
                stability: 0.5,
                ..HeadPose::default()
            },
            shoulder_alignment: 0.5,
            spinal_posture: 0.5,
            leaning: Leaning::Upright,
            ergonomic_score: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BlinkStats {
    /// Blinks per minute
    pub blink_rate: f64,
    pub avg_blink_duration_ms: f64,
    pub blink_count: u32,
    /// Fraction of the window with eyes closed
    pub perclos: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NeuroIndicators {
    pub stress_level: f64,
    pub mental_fatigue: f64,
    pub focus_intensity: f64,
    pub emotional_regulation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicroExpressionKind {
    BrowRaise,
    BrowFurrow,
    LipPress,
    LipCornerPull,
    EyeSquint,
}

impl MicroExpressionKind {
    /// Model output order.
    pub const ALL: [MicroExpressionKind; 5] = [
        MicroExpressionKind::BrowRaise,
        MicroExpressionKind::BrowFurrow,
        MicroExpressionKind::LipPress,
        MicroExpressionKind::LipCornerPull,
        MicroExpressionKind::EyeSquint,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroExpression {
    pub kind: MicroExpressionKind,
    pub intensity: f64,
    pub duration_ms: f64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Detected face bounding box in normalized frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    pub detected: bool,
}

impl FaceRegion {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Landmark-free descriptor of the face crop.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FacialActivity {
    pub brightness: f64,
    pub contrast: f64,
    /// Texture energy in the brow band
    pub brow_energy: f64,
    /// Texture energy in the mouth band
    pub mouth_energy: f64,
    pub eye_openness: f64,
    /// Pupil offset from the eye-band center, `[-1,1]`
    pub pupil_dx: f64,
    pub pupil_dy: f64,
    /// Left/right luminance balance, 1 = symmetric
    pub symmetry: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CulturalContext {
    /// Tag requested by the caller
    pub requested_tag: String,
    /// Profile actually applied
    pub profile: String,
    pub personal_baseline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplePhase {
    Calibrating,
    Active,
}

/// One fused, calibrated observation of the learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementSample {
    pub subject_id: String,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub phase: SamplePhase,
    pub overall_engagement: f64,
    pub attention_level: f64,
    pub cognitive_load: f64,
    pub fatigue_level: f64,
    pub distraction_probability: f64,
    pub emotional_state: EmotionalState,
    pub posture: PostureMetrics,
    pub blink_stats: BlinkStats,
    pub neuro_indicators: NeuroIndicators,
    pub distraction_events: Vec<DistractionEvent>,
    pub gaze: Option<GazePoint>,
    pub gaze_trail: Vec<GazePoint>,
    pub micro_expressions: Vec<MicroExpression>,
    pub cultural_context: CulturalContext,
    pub face: FaceRegion,
    pub facial_activity: FacialActivity,
}

impl EngagementSample {
    /// Every field documented as lying in `[0,1]`, by name.
    pub fn bounded_scalars(&self) -> Vec<(&'static str, f64)> {
        let mut fields = vec![
            ("overall_engagement", self.overall_engagement),
            ("attention_level", self.attention_level),
            ("cognitive_load", self.cognitive_load),
            ("fatigue_level", self.fatigue_level),
            ("distraction_probability", self.distraction_probability),
            ("emotion.intensity", self.emotional_state.intensity),
            ("emotion.arousal", self.emotional_state.arousal),
            ("emotion.confidence", self.emotional_state.confidence),
            ("posture.stability", self.posture.head_pose.stability),
            ("posture.shoulder_alignment", self.posture.shoulder_alignment),
            ("posture.spinal_posture", self.posture.spinal_posture),
            ("posture.ergonomic_score", self.posture.ergonomic_score),
            ("blink.perclos", self.blink_stats.perclos),
            ("neuro.stress_level", self.neuro_indicators.stress_level),
            ("neuro.mental_fatigue", self.neuro_indicators.mental_fatigue),
            ("neuro.focus_intensity", self.neuro_indicators.focus_intensity),
            (
                "neuro.emotional_regulation",
                self.neuro_indicators.emotional_regulation,
            ),
            ("face.confidence", self.face.confidence),
        ];
        for event in &self.distraction_events {
            fields.push(("distraction.impact", event.impact));
        }
        for point in &self.gaze_trail {
            fields.push(("gaze.x", point.x));
            fields.push(("gaze.y", point.y));
            fields.push(("gaze.confidence", point.confidence));
        }
        for micro in &self.micro_expressions {
            fields.push(("micro.intensity", micro.intensity));
            fields.push(("micro.confidence", micro.confidence));
        }
        fields
    }

    /// Force every bounded field back into range.
    pub fn clamp_bounded(&mut self) {
        self.overall_engagement = clamp_unit(self.overall_engagement);
        self.attention_level = clamp_unit(self.attention_level);
        self.cognitive_load = clamp_unit(self.cognitive_load);
        self.fatigue_level = clamp_unit(self.fatigue_level);
        self.distraction_probability = clamp_unit(self.distraction_probability);

        let emotion = &mut self.emotional_state;
        emotion.intensity = clamp_unit(emotion.intensity);
        emotion.valence = clamp_signed(emotion.valence);
        emotion.arousal = clamp_unit(emotion.arousal);
        emotion.confidence = clamp_unit(emotion.confidence);

        let posture = &mut self.posture;
        posture.head_pose.pitch = clamp_angle(posture.head_pose.pitch);
        posture.head_pose.yaw = clamp_angle(posture.head_pose.yaw);
        posture.head_pose.roll = clamp_angle(posture.head_pose.roll);
        posture.head_pose.stability = clamp_unit(posture.head_pose.stability);
        posture.shoulder_alignment = clamp_unit(posture.shoulder_alignment);
        posture.spinal_posture = clamp_unit(posture.spinal_posture);
        posture.ergonomic_score = clamp_unit(posture.ergonomic_score);

        self.blink_stats.perclos = clamp_unit(self.blink_stats.perclos);

        let neuro = &mut self.neuro_indicators;
        neuro.stress_level = clamp_unit(neuro.stress_level);
        neuro.mental_fatigue = clamp_unit(neuro.mental_fatigue);
        neuro.focus_intensity = clamp_unit(neuro.focus_intensity);
        neuro.emotional_regulation = clamp_unit(neuro.emotional_regulation);

        self.face.confidence = clamp_unit(self.face.confidence);
        for event in &mut self.distraction_events {
            event.impact = clamp_unit(event.impact);
        }
        for micro in &mut self.micro_expressions {
            micro.intensity = clamp_unit(micro.intensity);
            micro.confidence = clamp_unit(micro.confidence);
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A mid-range sample for tests.
    pub fn sample(subject: &str, timestamp: DateTime<Utc>) -> EngagementSample {
        EngagementSample {
            subject_id: subject.to_string(),
            timestamp,
            sequence: 0,
            phase: SamplePhase::Active,
            overall_engagement: 0.6,
            attention_level: 0.7,
            cognitive_load: 0.4,
            fatigue_level: 0.2,
            distraction_probability: 0.3,
            emotional_state: EmotionalState::default(),
            posture: PostureMetrics::default(),
            blink_stats: BlinkStats::default(),
            neuro_indicators: NeuroIndicators::default(),
            distraction_events: Vec::new(),
            gaze: None,
            gaze_trail: Vec::new(),
            micro_expressions: Vec::new(),
            cultural_context: CulturalContext {
                requested_tag: "general".into(),
                profile: "general".into(),
                personal_baseline: false,
            },
            face: FaceRegion::default(),
            facial_activity: FacialActivity::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_unit_handles_nan() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_signed(-3.0), -1.0);
        assert_eq!(clamp_angle(120.0), 90.0);
    }

    #[test]
    fn test_clamp_bounded_restores_ranges() {
        let mut sample = fixtures::sample("s1", Utc::now());
        sample.attention_level = 1.4;
        sample.fatigue_level = f64::NAN;
        sample.emotional_state.valence = -2.0;
        sample.posture.head_pose.yaw = -140.0;
        sample.clamp_bounded();

        for (name, value) in sample.bounded_scalars() {
            assert!((0.0..=1.0).contains(&value), "{name} = {value}");
        }
        assert_eq!(sample.emotional_state.valence, -1.0);
        assert_eq!(sample.posture.head_pose.yaw, -90.0);
    }

    #[test]
    fn test_emotion_order_is_stable() {
        assert_eq!(EmotionTag::ALL.len(), 13);
        assert_eq!(EmotionTag::ALL[0], EmotionTag::Neutral);
        assert_eq!(EmotionTag::ALL[12].as_str(), "focused");
    }

    #[test]
    fn test_sample_serializes_snake_case() {
        let sample = fixtures::sample("s1", Utc::now());
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"overall_engagement\""));
        assert!(json.contains("\"primary_emotion\":\"neutral\""));
        assert!(json.contains("\"phase\":\"active\""));
    }
}
