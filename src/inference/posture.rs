//! Head pose and posture from face-box geometry.
//!
//! Without landmarks the face box is the only skeleton available: its offset
//! from the frame center gives yaw and pitch, its jitter over the window gives
//! stability and its size relative to the session's recent baseline tells
//! whether the learner leans toward or away from the screen.

use super::{encode_frame_input, FrameInput, Modality};
use crate::core::history::{mean, std_dev};
use crate::core::sample::{clamp_angle, clamp_unit, HeadPose, Leaning, PostureMetrics};
use crate::model::{Tensor, TensorPool};

/// Degrees of rotation per unit of face-center offset.
const DEGREES_PER_OFFSET: f64 = 120.0;

const LEAN_FORWARD_RATIO: f64 = 1.15;
const LEAN_BACKWARD_RATIO: f64 = 0.85;
const LEAN_SIDEWAYS_OFFSET: f64 = 0.12;

pub struct Posture;

/// Geometry of the current face against the window baseline.
struct Geometry {
    stability: f64,
    area_ratio: f64,
    lateral_offset: f64,
}

impl Geometry {
    fn measure(input: &FrameInput<'_>) -> Self {
        let (cx, cy) = input.face.center();
        let present: Vec<_> = input
            .window
            .recent(Posture::HISTORY_LEN)
            .iter()
            .filter(|f| f.face_present > 0.5)
            .copied()
            .collect();

        let mut xs: Vec<f64> = present.iter().map(|f| f.face_cx).collect();
        let mut ys: Vec<f64> = present.iter().map(|f| f.face_cy).collect();
        let (base_area, base_cx) = if present.is_empty() {
            (input.face.area(), cx)
        } else {
            (
                mean(&present.iter().map(|f| f.face_area).collect::<Vec<_>>()),
                mean(&xs),
            )
        };
        xs.push(cx);
        ys.push(cy);

        Self {
            stability: clamp_unit(1.0 - 8.0 * (std_dev(&xs) + std_dev(&ys))),
            area_ratio: if base_area > 0.0 {
                input.face.area() / base_area
            } else {
                1.0
            },
            lateral_offset: cx - base_cx,
        }
    }

    fn leaning(&self) -> Leaning {
        if self.area_ratio > LEAN_FORWARD_RATIO {
            Leaning::Forward
        } else if self.area_ratio < LEAN_BACKWARD_RATIO {
            Leaning::Backward
        } else if self.lateral_offset.abs() > LEAN_SIDEWAYS_OFFSET {
            Leaning::Sideways
        } else {
            Leaning::Upright
        }
    }
}

fn assemble(pose: HeadPose, shoulder: f64, spine: f64, leaning: Leaning) -> PostureMetrics {
    let shoulder_alignment = clamp_unit(shoulder);
    let spinal_posture = clamp_unit(spine);
    PostureMetrics {
        head_pose: HeadPose {
            pitch: clamp_angle(pose.pitch),
            yaw: clamp_angle(pose.yaw),
            roll: clamp_angle(pose.roll),
            stability: clamp_unit(pose.stability),
        },
        shoulder_alignment,
        spinal_posture,
        leaning,
        ergonomic_score: clamp_unit(
            0.4 * spinal_posture + 0.3 * shoulder_alignment + 0.3 * pose.stability,
        ),
    }
}

impl Modality for Posture {
    const NAME: &'static str = "posture";
    const ARTIFACT: &'static str = "posture_estimator";
    const HISTORY_LEN: usize = 30;
    const OUTPUT_LEN: usize = 5;

    type Input<'a> = FrameInput<'a>;
    type Output = PostureMetrics;

    fn encode(input: &FrameInput<'_>, pool: &TensorPool) -> Tensor {
        encode_frame_input(input, pool, Self::HISTORY_LEN)
    }

    /// `[pitch, yaw, roll, shoulder_alignment, spinal_posture]`, angles
    /// scaled to `[-1,1]`.
    fn decode(input: &FrameInput<'_>, raw: &[f32]) -> PostureMetrics {
        if !input.face.detected {
            return Self::neutral();
        }
        let geometry = Geometry::measure(input);
        assemble(
            HeadPose {
                pitch: raw[0] as f64 * 90.0,
                yaw: raw[1] as f64 * 90.0,
                roll: raw[2] as f64 * 90.0,
                stability: geometry.stability,
            },
            raw[3] as f64,
            raw[4] as f64,
            geometry.leaning(),
        )
    }

    fn fallback(input: &FrameInput<'_>) -> PostureMetrics {
        if !input.face.detected {
            return Self::neutral();
        }
        let (cx, cy) = input.face.center();
        let geometry = Geometry::measure(input);
        let pitch = (0.5 - cy) * DEGREES_PER_OFFSET;
        let pose = HeadPose {
            pitch,
            yaw: (cx - 0.5) * DEGREES_PER_OFFSET,
            roll: 0.0,
            stability: geometry.stability,
        };
        let shoulder = 1.0 - 2.0 * geometry.lateral_offset.abs();
        let spine = 1.0 - 3.0 * (geometry.area_ratio - 1.0).abs() - clamp_angle(pitch).abs() / 90.0;
        assemble(pose, shoulder, spine, geometry.leaning())
    }

    fn neutral() -> PostureMetrics {
        PostureMetrics::default()
    }
}
