//! Multimodal fusion into the headline engagement metrics.
//!
//! Each modality contributes attention evidence weighted by a softmax gate
//! over its prior weight times its reported confidence, so a module that
//! cannot see the learner this tick fades out instead of dragging the
//! estimate toward its neutral reading. Attention is then smoothed against
//! the recent window.

use super::{
    encode_with_history, face_vector, sigmoid, softmax, CognitiveReading, GazeReading,
    MicroReading, Modality,
};
use crate::core::history::{mean, std_dev, HeadlineMetrics, HistoryWindow, TemporalFeatures};
use crate::core::sample::{
    clamp_unit, BlinkStats, EmotionalState, FaceRegion, FacialActivity, NeuroIndicators,
    PostureMetrics,
};
use crate::model::{Tensor, TensorPool};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Gate order: face, emotion, gaze, posture, micro, cognitive.
pub const GATE_COUNT: usize = 6;

const PRIOR_WEIGHTS: [f64; GATE_COUNT] = [0.1, 0.2, 0.3, 0.15, 0.05, 0.2];

const GATE_TEMPERATURE: f64 = 0.25;

/// Weight of the current tick against the window mean attention.
const ATTENTION_SMOOTHING: f64 = 0.7;

/// Attention retained when no face is visible.
const FACE_ABSENT_ATTENTION: f64 = 0.3;

/// Everything the per-modality stages produced this tick.
pub struct FusionInput<'a> {
    pub face: &'a FaceRegion,
    pub activity: &'a FacialActivity,
    pub emotion: &'a EmotionalState,
    pub gaze: &'a GazeReading,
    pub posture: &'a PostureMetrics,
    pub micro: &'a MicroReading,
    pub cognitive: &'a CognitiveReading,
    pub blink: &'a BlinkStats,
    pub window: &'a HistoryWindow,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionOutput {
    pub headline: HeadlineMetrics,
    pub neuro: NeuroIndicators,
    /// Normalized modality gates, see [`GATE_COUNT`]
    pub gates: [f64; GATE_COUNT],
}

pub struct Fusion;

impl FusionInput<'_> {
    fn gaze_on_screen(&self) -> bool {
        self.face.detected
            && self
                .gaze
                .point
                .map(|p| p.x > 0.0 && p.x < 1.0 && p.y > 0.0 && p.y < 1.0)
                .unwrap_or(false)
    }

    fn gates(&self) -> [f64; GATE_COUNT] {
        let confidences = [
            self.face.confidence,
            self.emotion.confidence,
            self.gaze.point.map(|p| p.confidence).unwrap_or(0.0),
            self.posture.head_pose.stability * self.face.confidence,
            self.micro.confidence,
            self.cognitive.confidence,
        ];
        let logits: Vec<f64> = PRIOR_WEIGHTS
            .iter()
            .zip(confidences)
            .map(|(w, c)| w * c / GATE_TEMPERATURE)
            .collect();
        let mut gates = [0.0; GATE_COUNT];
        for (g, p) in gates.iter_mut().zip(softmax(&logits)) {
            *g = p;
        }
        gates
    }

    /// Per-modality evidence that the learner is attending, in gate order.
    fn evidence(&self) -> [f64; GATE_COUNT] {
        let face = if self.face.detected { 1.0 } else { 0.0 };
        let gaze = match self.gaze.point {
            Some(p) if self.gaze_on_screen() => {
                let off_center = ((p.x - 0.5).powi(2) + (p.y - 0.5).powi(2)).sqrt();
                clamp_unit(1.0 - 0.8 * off_center)
            }
            _ => 0.0,
        };
        [
            face,
            self.emotion.primary_emotion.engagement_weight(),
            gaze,
            clamp_unit(1.0 - self.posture.head_pose.yaw.abs() / 45.0),
            clamp_unit(0.5 + 0.1 * self.micro.expressions.len() as f64),
            self.cognitive.effort,
        ]
    }

    fn history_mean(&self, field: impl Fn(&TemporalFeatures) -> f64) -> Option<f64> {
        let values: Vec<f64> = self
            .window
            .recent(Fusion::HISTORY_LEN)
            .iter()
            .filter(|f| f.face_present > 0.5)
            .map(field)
            .collect();
        (!values.is_empty()).then(|| mean(&values))
    }

    /// Neuro indicators derived from the fused headline.
    fn neuro(&self, headline: &HeadlineMetrics) -> NeuroIndicators {
        let valence = self.emotion.valence;
        let negative_arousal = if valence < 0.0 { self.emotion.arousal } else { 0.0 };
        let valences: Vec<f64> = self
            .window
            .recent(Fusion::HISTORY_LEN)
            .iter()
            .filter(|f| f.face_present > 0.5)
            .map(|f| f.valence)
            .collect();
        let valence_swing = if valences.is_empty() {
            0.0
        } else {
            (valence - mean(&valences)).abs()
        };

        NeuroIndicators {
            stress_level: clamp_unit(
                0.4 * self.cognitive.strain + 0.3 * (-valence).max(0.0) + 0.3 * negative_arousal,
            ),
            mental_fatigue: clamp_unit(0.6 * headline.fatigue_level + 0.4 * self.cognitive.strain),
            focus_intensity: clamp_unit(
                headline.attention_level * (0.5 + 0.5 * headline.cognitive_load),
            ),
            emotional_regulation: clamp_unit(
                1.0 - 2.0 * std_dev(&valences) - 0.3 * valence_swing,
            ),
        }
    }
}

impl Modality for Fusion {
    const NAME: &'static str = "fusion";
    const ARTIFACT: &'static str = "fusion_network";
    const HISTORY_LEN: usize = 20;
    const OUTPUT_LEN: usize = 5;

    type Input<'a> = FusionInput<'a>;
    type Output = FusionOutput;

    fn encode(input: &FusionInput<'_>, pool: &TensorPool) -> Tensor {
        let mut head = face_vector(input.face, input.activity);
        let gaze = input.gaze.point;
        head.extend([
            input.emotion.valence as f32,
            input.emotion.arousal as f32,
            input.emotion.intensity as f32,
            input.emotion.confidence as f32,
            gaze.map(|p| p.x).unwrap_or(0.5) as f32,
            gaze.map(|p| p.y).unwrap_or(0.5) as f32,
            gaze.map(|p| p.confidence).unwrap_or(0.0) as f32,
            input.gaze.eye_openness as f32,
            (input.posture.head_pose.pitch / 90.0) as f32,
            (input.posture.head_pose.yaw / 90.0) as f32,
            input.posture.head_pose.stability as f32,
            input.posture.ergonomic_score as f32,
            input.micro.expressions.len() as f32,
            input.cognitive.load as f32,
            input.cognitive.effort as f32,
            input.cognitive.strain as f32,
            input.blink.perclos as f32,
            (input.blink.blink_rate / 60.0) as f32,
        ]);
        encode_with_history(pool, head, input.window, Self::HISTORY_LEN)
    }

    /// Logits for `[engagement, attention, cognitive_load, fatigue, distraction]`.
    fn decode(input: &FusionInput<'_>, raw: &[f32]) -> FusionOutput {
        let headline = HeadlineMetrics {
            overall_engagement: sigmoid(raw[0] as f64),
            attention_level: sigmoid(raw[1] as f64),
            cognitive_load: sigmoid(raw[2] as f64),
            fatigue_level: sigmoid(raw[3] as f64),
            distraction_probability: sigmoid(raw[4] as f64),
        };
        FusionOutput {
            neuro: input.neuro(&headline),
            gates: input.gates(),
            headline,
        }
    }

    fn fallback(input: &FusionInput<'_>) -> FusionOutput {
        let gates = input.gates();
        let evidence = input.evidence();
        let mut attention_now: f64 = gates.iter().zip(evidence).map(|(g, e)| g * e).sum();
        if !input.face.detected {
            attention_now *= FACE_ABSENT_ATTENTION;
        }
        let attention = clamp_unit(match input.history_mean(|f| f.attention) {
            Some(prev) => ATTENTION_SMOOTHING * attention_now + (1.0 - ATTENTION_SMOOTHING) * prev,
            None => attention_now,
        });

        let fatigue = if input.face.detected {
            clamp_unit(
                0.45 * (input.blink.perclos / 0.3).min(1.0)
                    + 0.35 * (1.0 - input.gaze.eye_openness)
                    + 0.2 * (1.0 - input.posture.head_pose.stability),
            )
        } else {
            input.history_mean(|f| f.fatigue).unwrap_or(0.2)
        };

        let off_task = if input.gaze_on_screen() { 0.0 } else { 1.0 };
        let distraction = clamp_unit(0.6 * (1.0 - attention) + 0.4 * off_task);

        let engagement = clamp_unit(
            0.45 * attention
                + 0.25 * input.emotion.primary_emotion.engagement_weight()
                + 0.15 * (1.0 - fatigue)
                + 0.15 * input.cognitive.effort,
        );

        let headline = HeadlineMetrics {
            overall_engagement: engagement,
            attention_level: attention,
            cognitive_load: clamp_unit(input.cognitive.load),
            fatigue_level: fatigue,
            distraction_probability: distraction,
        };
        FusionOutput {
            neuro: input.neuro(&headline),
            gates,
            headline,
        }
    }

    fn neutral() -> FusionOutput {
        FusionOutput {
            headline: HeadlineMetrics {
                overall_engagement: 0.5,
                attention_level: 0.5,
                cognitive_load: 0.5,
                fatigue_level: 0.5,
                distraction_probability: 0.5,
            },
            neuro: NeuroIndicators {
                stress_level: 0.5,
                mental_fatigue: 0.5,
                focus_intensity: 0.5,
                emotional_regulation: 0.5,
            },
            gates: [1.0 / GATE_COUNT as f64; GATE_COUNT],
        }
    }
}
