//! Screen-space gaze estimation.

use super::{encode_frame_input, FrameInput, Modality};
use crate::core::sample::{clamp_unit, GazePoint};
use crate::model::{Tensor, TensorPool};
use serde::{Deserialize, Serialize};

/// Screen-widths the gaze moves per unit of normalized pupil offset.
const PUPIL_GAIN: f64 = 0.4;

/// Weight of the current estimate against the previous tick's gaze.
const SMOOTHING: f64 = 0.8;

/// Confidence multiplier when no pupil could be located.
const NO_PUPIL_PENALTY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GazeReading {
    /// Unset when no face was found
    pub point: Option<GazePoint>,
    pub eye_openness: f64,
}

pub struct Gaze;

impl Modality for Gaze {
    const NAME: &'static str = "gaze";
    const ARTIFACT: &'static str = "gaze_estimator";
    const HISTORY_LEN: usize = 10;
    const OUTPUT_LEN: usize = 4;

    type Input<'a> = FrameInput<'a>;
    type Output = GazeReading;

    fn encode(input: &FrameInput<'_>, pool: &TensorPool) -> Tensor {
        encode_frame_input(input, pool, Self::HISTORY_LEN)
    }

    /// `[x, y, confidence, eye_openness]`
    fn decode(input: &FrameInput<'_>, raw: &[f32]) -> GazeReading {
        let eye_openness = clamp_unit(raw[3] as f64);
        if !input.face.detected {
            return GazeReading {
                point: None,
                eye_openness,
            };
        }
        GazeReading {
            point: Some(GazePoint::new(
                raw[0] as f64,
                raw[1] as f64,
                input.timestamp.timestamp_millis(),
                raw[2] as f64,
            )),
            eye_openness,
        }
    }

    /// Pupil offset plus head offset, lightly smoothed against the last tick.
    fn fallback(input: &FrameInput<'_>) -> GazeReading {
        let activity = input.activity;
        if !input.face.detected {
            return Self::neutral();
        }
        let (cx, cy) = input.face.center();
        let mut x = 0.5 + PUPIL_GAIN * activity.pupil_dx + (cx - 0.5);
        let mut y = 0.5 + PUPIL_GAIN * activity.pupil_dy + (cy - 0.5);

        if let Some(last) = input.window.last().filter(|f| f.face_present > 0.5) {
            x = SMOOTHING * x + (1.0 - SMOOTHING) * last.gaze_x;
            y = SMOOTHING * y + (1.0 - SMOOTHING) * last.gaze_y;
        }

        let pupil_found = activity.pupil_dx != 0.0 || activity.pupil_dy != 0.0;
        let confidence = input.face.confidence
            * activity.eye_openness
            * if pupil_found { 1.0 } else { NO_PUPIL_PENALTY };

        GazeReading {
            point: Some(GazePoint::new(
                x,
                y,
                input.timestamp.timestamp_millis(),
                confidence,
            )),
            eye_openness: clamp_unit(activity.eye_openness),
        }
    }

    fn neutral() -> GazeReading {
        GazeReading::default()
    }
}
