//! Face detection and the landmark-free face descriptor.

use super::{encode_with_history, luma_patch, Modality};
use crate::core::history::{mean, HistoryWindow};
use crate::core::sample::{clamp_signed, clamp_unit, FaceRegion, FacialActivity};
use crate::model::{Tensor, TensorPool};
use crate::source::{Frame, FrameCrop};

/// Minimum confidence for a region to count as a detected face.
pub const MIN_FACE_CONFIDENCE: f64 = 0.3;

/// Fraction of an open-eye band expected to be dark (iris, sclera shadow).
const OPEN_EYE_DARK_FRACTION: f64 = 0.2;

const BROW_BAND: (f64, f64) = (0.15, 0.32);
const EYE_BAND: (f64, f64) = (0.28, 0.48);
const MOUTH_BAND: (f64, f64) = (0.62, 0.85);
/// Horizontal extent of the eye band, excluding the crop corners
const EYE_COLUMNS: (f64, f64) = (0.12, 0.88);

pub struct FaceInput<'a> {
    pub frame: &'a Frame,
    pub window: &'a HistoryWindow,
}

pub struct Face;

impl Modality for Face {
    const NAME: &'static str = "face";
    const ARTIFACT: &'static str = "face_detector";
    const HISTORY_LEN: usize = 5;
    const OUTPUT_LEN: usize = 5;

    type Input<'a> = FaceInput<'a>;
    type Output = FaceRegion;

    fn encode(input: &FaceInput<'_>, pool: &TensorPool) -> Tensor {
        let frame = input.frame;
        let head = luma_patch(frame.width, frame.height, |x, y| frame.pixel(x, y));
        encode_with_history(pool, head, input.window, Self::HISTORY_LEN)
    }

    /// `[x, y, w, h, confidence]`, all normalized.
    fn decode(_input: &FaceInput<'_>, raw: &[f32]) -> FaceRegion {
        let x = clamp_unit(raw[0] as f64);
        let y = clamp_unit(raw[1] as f64);
        let confidence = clamp_unit(raw[4] as f64);
        FaceRegion {
            x,
            y,
            width: clamp_unit(raw[2] as f64).min(1.0 - x),
            height: clamp_unit(raw[3] as f64).min(1.0 - y),
            confidence,
            detected: confidence >= MIN_FACE_CONFIDENCE,
        }
    }

    /// Bright-blob detection: threshold at mean + σ/2, take the bounding box
    /// of rows and columns with enough bright pixels and score by fill ratio.
    fn fallback(input: &FaceInput<'_>) -> FaceRegion {
        let mut region = detect_bright_region(input.frame);
        if !region.detected {
            return region;
        }

        // Pull the box toward where the face has recently been.
        let recent = input.window.recent(Self::HISTORY_LEN);
        let present: Vec<_> = recent.iter().filter(|f| f.face_present > 0.5).collect();
        if !present.is_empty() {
            let prev_cx = mean(&present.iter().map(|f| f.face_cx).collect::<Vec<_>>());
            let prev_cy = mean(&present.iter().map(|f| f.face_cy).collect::<Vec<_>>());
            let (cx, cy) = region.center();
            let cx = 0.8 * cx + 0.2 * prev_cx;
            let cy = 0.8 * cy + 0.2 * prev_cy;
            region.x = clamp_unit(cx - region.width / 2.0);
            region.y = clamp_unit(cy - region.height / 2.0);
            region.width = region.width.min(1.0 - region.x);
            region.height = region.height.min(1.0 - region.y);
        }
        region
    }

    fn neutral() -> FaceRegion {
        FaceRegion::default()
    }
}

fn detect_bright_region(frame: &Frame) -> FaceRegion {
    let n = frame.luma.len() as f64;
    if n == 0.0 {
        return FaceRegion::default();
    }
    let mean_luma = frame.mean_luma();
    let variance = frame
        .luma
        .iter()
        .map(|&v| (v as f64 - mean_luma).powi(2))
        .sum::<f64>()
        / n;
    let threshold = mean_luma + 0.5 * variance.sqrt();

    let (w, h) = (frame.width as usize, frame.height as usize);
    let mut row_counts = vec![0usize; h];
    let mut col_counts = vec![0usize; w];
    for y in 0..h {
        for x in 0..w {
            if frame.luma[y * w + x] as f64 > threshold {
                row_counts[y] += 1;
                col_counts[x] += 1;
            }
        }
    }

    let min_row = (0.03 * w as f64).ceil().max(2.0) as usize;
    let min_col = (0.03 * h as f64).ceil().max(2.0) as usize;
    let rows: Vec<usize> = (0..h).filter(|&y| row_counts[y] >= min_row).collect();
    let cols: Vec<usize> = (0..w).filter(|&x| col_counts[x] >= min_col).collect();
    let (Some(&y0), Some(&y1), Some(&x0), Some(&x1)) =
        (rows.first(), rows.last(), cols.first(), cols.last())
    else {
        return FaceRegion::default();
    };

    let box_w = x1 - x0 + 1;
    let box_h = y1 - y0 + 1;
    let mut inside = 0usize;
    for y in y0..=y1 {
        for x in x0..=x1 {
            if frame.luma[y * w + x] as f64 > threshold {
                inside += 1;
            }
        }
    }
    let fill = inside as f64 / (box_w * box_h) as f64;
    let area = (box_w * box_h) as f64 / n;

    // An ellipse fills about 78% of its bounding box.
    let shape_score = clamp_unit(1.0 - (fill - 0.78).abs() / 0.78);
    let size_score = if (0.01..=0.8).contains(&area) { 1.0 } else { 0.3 };
    let confidence = clamp_unit(shape_score * size_score);

    FaceRegion {
        x: x0 as f64 / w as f64,
        y: y0 as f64 / h as f64,
        width: box_w as f64 / w as f64,
        height: box_h as f64 / h as f64,
        confidence,
        detected: confidence >= MIN_FACE_CONFIDENCE,
    }
}

/// Measure the face crop: brightness, texture in the brow and mouth bands,
/// eye openness, pupil offset and left/right symmetry.
pub fn describe_face(crop: &FrameCrop) -> FacialActivity {
    if crop.luma.is_empty() {
        return FacialActivity::default();
    }
    let n = crop.luma.len() as f64;
    let mean_luma = crop.luma.iter().map(|&v| v as f64).sum::<f64>() / n;
    let std = (crop
        .luma
        .iter()
        .map(|&v| (v as f64 - mean_luma).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();

    let (eye_openness, pupil_dx, pupil_dy) = measure_eyes(crop, mean_luma);

    let half = crop.width / 2;
    let (mut left, mut right) = (0.0, 0.0);
    for y in 0..crop.height {
        for x in 0..crop.width {
            let v = crop.pixel(x, y) as f64;
            if x < half {
                left += v;
            } else if x >= crop.width - half {
                right += v;
            }
        }
    }
    let symmetry = if left + right > 0.0 {
        1.0 - (left - right).abs() / (left + right)
    } else {
        1.0
    };

    FacialActivity {
        brightness: clamp_unit(mean_luma / 255.0),
        contrast: clamp_unit(std / 128.0),
        brow_energy: crop.band_gradient_energy(BROW_BAND.0, BROW_BAND.1),
        mouth_energy: crop.band_gradient_energy(MOUTH_BAND.0, MOUTH_BAND.1),
        eye_openness,
        pupil_dx,
        pupil_dy,
        symmetry: clamp_unit(symmetry),
    }
}

/// Eye openness from the dark fraction of the eye band; pupil offset from
/// the darkest pixels relative to the eye region of each half.
fn measure_eyes(crop: &FrameCrop, mean_luma: f64) -> (f64, f64, f64) {
    let rows = crop.band_rows(EYE_BAND.0, EYE_BAND.1);
    let x_start = (EYE_COLUMNS.0 * crop.width as f64).floor() as u32;
    let x_end = ((EYE_COLUMNS.1 * crop.width as f64).ceil() as u32).min(crop.width);
    if rows.is_empty() || x_end <= x_start {
        return (0.0, 0.0, 0.0);
    }

    let eye_threshold = 0.6 * mean_luma;
    let pupil_threshold = 0.25 * mean_luma;
    let mid = crop.width / 2;

    // [left, right] accumulators: (count, sum_x, sum_y, min_x, max_x, min_y, max_y)
    let mut eyes = [(0usize, 0.0, 0.0, u32::MAX, 0u32, u32::MAX, 0u32); 2];
    let mut pupils = [(0usize, 0.0, 0.0); 2];
    let mut total = 0usize;

    for y in rows.clone() {
        for x in x_start..x_end {
            total += 1;
            let v = crop.pixel(x, y) as f64;
            if v >= eye_threshold {
                continue;
            }
            let side = usize::from(x >= mid);
            let e = &mut eyes[side];
            e.0 += 1;
            e.1 += x as f64;
            e.2 += y as f64;
            e.3 = e.3.min(x);
            e.4 = e.4.max(x);
            e.5 = e.5.min(y);
            e.6 = e.6.max(y);
            if v < pupil_threshold {
                let p = &mut pupils[side];
                p.0 += 1;
                p.1 += x as f64;
                p.2 += y as f64;
            }
        }
    }

    let dark = eyes[0].0 + eyes[1].0;
    let openness = clamp_unit(dark as f64 / total.max(1) as f64 / OPEN_EYE_DARK_FRACTION);

    let mut offsets = Vec::new();
    for side in 0..2 {
        let (count, sx, sy, x0, x1, y0, y1) = eyes[side];
        let (pc, px, py) = pupils[side];
        if count == 0 || pc == 0 {
            continue;
        }
        let (ex, ey) = (sx / count as f64, sy / count as f64);
        let half_w = ((x1 - x0) as f64 / 2.0).max(1.0);
        let half_h = ((y1 - y0) as f64 / 2.0).max(1.0);
        offsets.push((
            (px / pc as f64 - ex) / half_w,
            (py / pc as f64 - ey) / half_h,
        ));
    }
    if offsets.is_empty() {
        return (openness, 0.0, 0.0);
    }
    let dx = offsets.iter().map(|o| o.0).sum::<f64>() / offsets.len() as f64;
    let dy = offsets.iter().map(|o| o.1).sum::<f64>() / offsets.len() as f64;
    (openness, clamp_signed(2.0 * dx), clamp_signed(2.0 * dy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::test_support;
    use crate::source::{FrameSource, SyntheticConfig, SyntheticFrameSource};

    #[test]
    fn test_fallback_finds_bright_rectangle() {
        let frame = test_support::face_frame();
        let window = HistoryWindow::default();
        let region = Face::fallback(&FaceInput {
            frame: &frame,
            window: &window,
        });
        assert!(region.detected);
        assert!((region.x - 28.0 / 80.0).abs() < 0.02);
        assert!((region.width - 24.0 / 80.0).abs() < 0.02);
        assert!((region.y - 12.0 / 60.0).abs() < 0.02);
    }

    #[test]
    fn test_uniform_frame_has_no_face() {
        let frame = Frame::new(0, test_support::at(0), 40, 30, vec![90; 1200]).unwrap();
        let window = HistoryWindow::default();
        let region = Face::fallback(&FaceInput {
            frame: &frame,
            window: &window,
        });
        assert!(!region.detected);
        assert_eq!(region.confidence, 0.0);
    }

    #[test]
    fn test_detects_synthetic_face_with_open_eyes() {
        let mut source = SyntheticFrameSource::new(SyntheticConfig {
            seed: 11,
            start: test_support::at(0),
            distractions: false,
            ..SyntheticConfig::default()
        });
        source.open().unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        let window = HistoryWindow::default();
        let region = Face::fallback(&FaceInput {
            frame: &frame,
            window: &window,
        });
        assert!(region.detected, "{region:?}");
        let (cx, _) = region.center();
        assert!((cx - 0.5).abs() < 0.1);

        let crop = frame
            .crop(region.x, region.y, region.width, region.height)
            .unwrap();
        let activity = describe_face(&crop);
        assert!(activity.eye_openness > 0.5, "{activity:?}");
        assert!(activity.symmetry > 0.8);
        assert!(activity.brightness > 0.4);
    }

    #[test]
    fn test_decode_clips_to_frame() {
        let frame = test_support::face_frame();
        let window = HistoryWindow::default();
        let input = FaceInput {
            frame: &frame,
            window: &window,
        };
        let region = Face::decode(&input, &[0.8, 0.1, 0.5, 0.5, 0.9]);
        assert!(region.detected);
        assert!((region.x + region.width - 1.0).abs() < 1e-6);

        let region = Face::decode(&input, &[0.1, 0.1, 0.5, 0.5, 0.1]);
        assert!(!region.detected);
    }

    #[test]
    fn test_describe_empty_crop() {
        let crop = FrameCrop {
            width: 0,
            height: 0,
            luma: Vec::new(),
        };
        assert_eq!(describe_face(&crop), FacialActivity::default());
    }
}
