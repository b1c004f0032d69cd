//! Micro-expression detection.

use super::{encode_frame_input, FrameInput, Modality};
use crate::core::history::{mean, std_dev, TemporalFeatures};
use crate::core::sample::{clamp_unit, MicroExpression, MicroExpressionKind};
use crate::model::{Tensor, TensorPool};
use serde::{Deserialize, Serialize};

/// Deviation, in standard deviations, that counts as an expression.
const Z_THRESHOLD: f64 = 2.0;

/// Minimum real history entries before deviations are trusted.
const MIN_HISTORY: usize = 5;

/// Floor on the window's standard deviation.
const MIN_STD: f64 = 0.02;

/// Model intensities at or above this are reported.
const MODEL_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MicroReading {
    pub expressions: Vec<MicroExpression>,
    pub confidence: f64,
}

pub struct Micro;

impl Modality for Micro {
    const NAME: &'static str = "micro_expression";
    const ARTIFACT: &'static str = "micro_expression_detector";
    const HISTORY_LEN: usize = 15;
    const OUTPUT_LEN: usize = 5;

    type Input<'a> = FrameInput<'a>;
    type Output = MicroReading;

    fn encode(input: &FrameInput<'_>, pool: &TensorPool) -> Tensor {
        encode_frame_input(input, pool, Self::HISTORY_LEN)
    }

    /// Intensities in [`MicroExpressionKind::ALL`] order.
    fn decode(input: &FrameInput<'_>, raw: &[f32]) -> MicroReading {
        if !input.face.detected {
            return Self::neutral();
        }
        let duration_ms = frame_gap_ms(input);
        let expressions: Vec<_> = MicroExpressionKind::ALL
            .iter()
            .zip(raw)
            .map(|(&kind, &v)| (kind, clamp_unit(v as f64)))
            .filter(|(_, intensity)| *intensity >= MODEL_THRESHOLD)
            .map(|(kind, intensity)| MicroExpression {
                kind,
                intensity,
                duration_ms,
                confidence: clamp_unit(intensity * input.face.confidence),
                timestamp: input.timestamp,
            })
            .collect();
        MicroReading {
            confidence: input.face.confidence,
            expressions,
        }
    }

    /// Short-lived departures of the brow, mouth and eye bands from their
    /// recent mean.
    fn fallback(input: &FrameInput<'_>) -> MicroReading {
        if !input.face.detected {
            return Self::neutral();
        }
        let history: Vec<TemporalFeatures> = input
            .window
            .recent(Self::HISTORY_LEN)
            .iter()
            .filter(|f| f.face_present > 0.5)
            .copied()
            .collect();
        if history.len() < MIN_HISTORY {
            return MicroReading {
                expressions: Vec::new(),
                confidence: 0.0,
            };
        }

        let z = |field: fn(&TemporalFeatures) -> f64, current: f64| -> f64 {
            let values: Vec<f64> = history.iter().map(field).collect();
            (current - mean(&values)) / std_dev(&values).max(MIN_STD)
        };
        let activity = input.activity;
        let z_brow = z(|f| f.brow_energy, activity.brow_energy);
        let z_mouth = z(|f| f.mouth_energy, activity.mouth_energy);
        let z_eye = z(|f| f.eye_openness, activity.eye_openness);

        let mut found = Vec::new();
        if z_brow >= Z_THRESHOLD {
            found.push((MicroExpressionKind::BrowRaise, z_brow));
        } else if z_brow <= -Z_THRESHOLD {
            found.push((MicroExpressionKind::BrowFurrow, z_brow));
        }
        if z_mouth >= Z_THRESHOLD {
            found.push((MicroExpressionKind::LipCornerPull, z_mouth));
        } else if z_mouth <= -Z_THRESHOLD {
            found.push((MicroExpressionKind::LipPress, z_mouth));
        }
        // A closed eye is a blink, not a squint.
        if z_eye <= -Z_THRESHOLD && activity.eye_openness > 0.3 {
            found.push((MicroExpressionKind::EyeSquint, z_eye));
        }

        let duration_ms = frame_gap_ms(input);
        let history_weight = (history.len() as f64 / Self::HISTORY_LEN as f64).min(1.0);
        let confidence = clamp_unit(input.face.confidence * history_weight);
        MicroReading {
            expressions: found
                .into_iter()
                .map(|(kind, z)| MicroExpression {
                    kind,
                    intensity: clamp_unit((z.abs() - Z_THRESHOLD) / 3.0 + 0.3),
                    duration_ms,
                    confidence: clamp_unit(confidence * (z.abs() / 5.0).min(1.0)),
                    timestamp: input.timestamp,
                })
                .collect(),
            confidence,
        }
    }

    fn neutral() -> MicroReading {
        MicroReading::default()
    }
}

/// Time since the previous tick; an expression is observed for one frame.
fn frame_gap_ms(input: &FrameInput<'_>) -> f64 {
    input
        .window
        .last()
        .map(|f| (input.timestamp.timestamp_millis() - f.timestamp_ms).max(0) as f64)
        .unwrap_or(0.0)
}
