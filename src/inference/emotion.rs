//! Emotion classification over the 13 learner-relevant categories.
//!
//! The built-in estimator places the face on the valence/arousal circumplex
//! from how the brow and mouth bands move relative to the recent window,
//! then scores each category by its distance to that point.

use super::{encode_frame_input, softmax, FrameInput, Modality};
use crate::core::history::mean;
use crate::core::sample::{clamp_signed, clamp_unit, EmotionTag, EmotionalState};
use crate::model::{Tensor, TensorPool};

/// Squared circumplex distance at which a category's logit falls by one.
const DISTANCE_SCALE: f64 = 0.1;

/// Secondary emotions below this probability are dropped.
const SECONDARY_MIN_PROBABILITY: f64 = 0.2;

pub struct Emotion;

impl Modality for Emotion {
    const NAME: &'static str = "emotion";
    const ARTIFACT: &'static str = "emotion_classifier";
    const HISTORY_LEN: usize = 5;
    const OUTPUT_LEN: usize = 13;

    type Input<'a> = FrameInput<'a>;
    type Output = EmotionalState;

    fn encode(input: &FrameInput<'_>, pool: &TensorPool) -> Tensor {
        encode_frame_input(input, pool, Self::HISTORY_LEN)
    }

    /// Logits in [`EmotionTag::ALL`] order.
    fn decode(input: &FrameInput<'_>, raw: &[f32]) -> EmotionalState {
        if !input.face.detected {
            return Self::neutral();
        }
        let logits: Vec<f64> = raw.iter().map(|&v| v as f64).collect();
        let probs = softmax(&logits);
        let valence: f64 = EmotionTag::ALL
            .iter()
            .zip(&probs)
            .map(|(tag, p)| p * tag.circumplex().0)
            .sum();
        let arousal: f64 = EmotionTag::ALL
            .iter()
            .zip(&probs)
            .map(|(tag, p)| p * tag.circumplex().1)
            .sum();
        from_probabilities(&probs, valence, arousal, 1.0)
    }

    fn fallback(input: &FrameInput<'_>) -> EmotionalState {
        if !input.face.detected {
            return Self::neutral();
        }
        let activity = input.activity;
        let recent: Vec<_> = input
            .window
            .recent(Self::HISTORY_LEN)
            .iter()
            .filter(|f| f.face_present > 0.5)
            .copied()
            .collect();
        let (base_brow, base_mouth) = if recent.is_empty() {
            (activity.brow_energy, activity.mouth_energy)
        } else {
            (
                mean(&recent.iter().map(|f| f.brow_energy).collect::<Vec<_>>()),
                mean(&recent.iter().map(|f| f.mouth_energy).collect::<Vec<_>>()),
            )
        };
        let d_brow = activity.brow_energy - base_brow;
        let d_mouth = activity.mouth_energy - base_mouth;

        // Mouth movement reads as pleasant, brow tension as unpleasant.
        let valence = clamp_signed(5.0 * d_mouth - 3.0 * d_brow);
        let arousal = clamp_unit(
            0.3 + 4.0 * (d_brow.abs() + d_mouth.abs()) + 0.3 * (activity.eye_openness - 0.5),
        );

        let logits: Vec<f64> = EmotionTag::ALL
            .iter()
            .map(|tag| {
                let (v, a) = tag.circumplex();
                -((valence - v).powi(2) + (arousal - a).powi(2)) / DISTANCE_SCALE
            })
            .collect();
        let probs = softmax(&logits);
        from_probabilities(&probs, valence, arousal, input.face.confidence)
    }

    fn neutral() -> EmotionalState {
        EmotionalState::default()
    }
}

fn from_probabilities(
    probs: &[f64],
    valence: f64,
    arousal: f64,
    face_confidence: f64,
) -> EmotionalState {
    let mut ranked: Vec<(usize, f64)> = probs.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (primary_idx, primary_p) = ranked.first().copied().unwrap_or((0, 0.0));
    let secondary_emotion = ranked
        .get(1)
        .filter(|(_, p)| *p > SECONDARY_MIN_PROBABILITY)
        .map(|(i, _)| EmotionTag::ALL[*i]);

    let (nv, na) = EmotionTag::Neutral.circumplex();
    let intensity = ((valence - nv).powi(2) + (arousal - na).powi(2)).sqrt();

    EmotionalState {
        primary_emotion: EmotionTag::ALL[primary_idx],
        secondary_emotion,
        intensity: clamp_unit(intensity),
        valence: clamp_signed(valence),
        arousal: clamp_unit(arousal),
        confidence: clamp_unit(primary_p * face_confidence),
        culturally_adjusted: false,
    }
}
