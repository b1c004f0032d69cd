//! Cognitive load estimation.
//!
//! Combines three ocular and facial cues: blink suppression (people blink
//! less under load), how much of the window the gaze spent fixating, and
//! brow tension.

use super::{encode_frame_input, FrameInput, Modality};
use crate::core::history::compute_blink_stats;
use crate::core::sample::clamp_unit;
use crate::model::{Tensor, TensorPool};
use serde::{Deserialize, Serialize};

/// Resting blink rate in blinks per minute.
const RESTING_BLINK_RATE: f64 = 17.0;

/// Brow energy that reads as full tension.
const FULL_BROW_TENSION: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CognitiveReading {
    pub load: f64,
    pub effort: f64,
    pub strain: f64,
    pub confidence: f64,
}

impl Default for CognitiveReading {
    fn default() -> Self {
        Self {
            load: 0.3,
            effort: 0.3,
            strain: 0.0,
            confidence: 0.0,
        }
    }
}

pub struct Cognitive;

impl Modality for Cognitive {
    const NAME: &'static str = "cognitive_load";
    const ARTIFACT: &'static str = "cognitive_load_estimator";
    const HISTORY_LEN: usize = 10;
    const OUTPUT_LEN: usize = 3;

    type Input<'a> = FrameInput<'a>;
    type Output = CognitiveReading;

    fn encode(input: &FrameInput<'_>, pool: &TensorPool) -> Tensor {
        encode_frame_input(input, pool, Self::HISTORY_LEN)
    }

    /// `[load, effort, strain]`
    fn decode(input: &FrameInput<'_>, raw: &[f32]) -> CognitiveReading {
        CognitiveReading {
            load: clamp_unit(raw[0] as f64),
            effort: clamp_unit(raw[1] as f64),
            strain: clamp_unit(raw[2] as f64),
            confidence: if input.face.detected {
                input.face.confidence
            } else {
                0.0
            },
        }
    }

    fn fallback(input: &FrameInput<'_>) -> CognitiveReading {
        if !input.face.detected {
            return Self::neutral();
        }
        let recent = input.window.recent(Self::HISTORY_LEN);
        let mut series: Vec<(i64, f64)> = recent
            .iter()
            .map(|f| (f.timestamp_ms, f.eye_openness))
            .collect();
        series.push((
            input.timestamp.timestamp_millis(),
            input.activity.eye_openness,
        ));
        let blinks = compute_blink_stats(&series);
        let suppression = clamp_unit(1.0 - blinks.blink_rate / RESTING_BLINK_RATE);

        let present: Vec<_> = recent.iter().filter(|f| f.face_present > 0.5).collect();
        let fixation = if present.is_empty() {
            0.0
        } else {
            present.iter().filter(|f| f.gaze_speed == 0.0).count() as f64 / present.len() as f64
        };
        let tension = clamp_unit(input.activity.brow_energy / FULL_BROW_TENSION);

        let load = clamp_unit(0.4 * suppression + 0.35 * fixation + 0.25 * tension);
        let history_weight = (present.len() as f64 / Self::HISTORY_LEN as f64).min(1.0);
        CognitiveReading {
            load,
            effort: clamp_unit(0.6 * load + 0.4 * fixation),
            strain: clamp_unit(0.5 * tension + 0.5 * (1.0 - input.activity.eye_openness)),
            confidence: clamp_unit(input.face.confidence * history_weight),
        }
    }

    fn neutral() -> CognitiveReading {
        CognitiveReading::default()
    }
}
