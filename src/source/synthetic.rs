//! Deterministic synthetic frame source.
//!
//! Renders a bright elliptical face on a dark background with eyes, pupils,
//! brows and a mouth. Head drift, gaze, blinks, brow flashes and look-away
//! episodes are driven by a seeded RNG so a given seed always produces the
//! same stream. Frame timestamps advance by exactly one frame interval.

use super::types::Frame;
use super::FrameSource;
use crate::error::CaptureError;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const BACKGROUND: f64 = 40.0;
const SKIN: f64 = 175.0;
const EYE: f64 = 70.0;
const PUPIL: f64 = 15.0;
const BROW: f64 = 80.0;
const MOUTH: f64 = 60.0;

/// Parameters for the synthetic stream.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    /// Spacing between frame timestamps
    pub frame_interval: Duration,
    /// Timestamp of frame zero
    pub start: DateTime<Utc>,
    /// Insert periodic look-away episodes
    pub distractions: bool,
    /// Stop after this many frames by reporting a disconnect
    pub max_frames: Option<u64>,
    /// Luma noise amplitude
    pub noise: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 160,
            height: 120,
            seed: 7,
            frame_interval: Duration::from_millis(100),
            start: Utc::now(),
            distractions: true,
            max_frames: None,
            noise: 6.0,
        }
    }
}

/// Seeded face-like frame generator.
pub struct SyntheticFrameSource {
    config: SyntheticConfig,
    rng: StdRng,
    sequence: u64,
    open: bool,
    next_blink_at: f64,
    blink_until: f64,
    brow_flash: f64,
    away_until: f64,
    next_away_at: f64,
}

impl SyntheticFrameSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let next_blink_at = rng.gen_range(1.0..3.0);
        let next_away_at = rng.gen_range(15.0..25.0);
        Self {
            config,
            rng,
            sequence: 0,
            open: false,
            next_blink_at,
            blink_until: 0.0,
            brow_flash: 0.0,
            away_until: 0.0,
            next_away_at,
        }
    }

    /// Create with a seed and otherwise default parameters.
    pub fn with_seed(seed: u64) -> Self {
        Self::new(SyntheticConfig {
            seed,
            ..SyntheticConfig::default()
        })
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of frames produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.sequence
    }

    fn render(&mut self) -> Result<Frame, CaptureError> {
        let seq = self.sequence;
        let t = seq as f64 * self.config.frame_interval.as_secs_f64();

        // Blink schedule.
        if t >= self.next_blink_at {
            self.blink_until = t + 0.18;
            self.next_blink_at = t + self.rng.gen_range(2.5..5.0);
        }
        let blinking = t < self.blink_until;

        // Look-away schedule.
        if self.config.distractions && t >= self.next_away_at {
            self.away_until = t + self.rng.gen_range(1.5..3.5);
            self.next_away_at = t + self.rng.gen_range(15.0..30.0);
        }
        let looking_away = t < self.away_until;

        // Occasional brow flash decaying over a few frames.
        if self.rng.gen_bool(0.02) {
            self.brow_flash = 1.0;
        } else {
            self.brow_flash *= 0.5;
        }

        let w = self.config.width as f64;
        let h = self.config.height as f64;
        let cx = if looking_away {
            0.8
        } else {
            0.5 + 0.05 * (t * 0.3).sin()
        } * w;
        let cy = (0.47 + 0.03 * (t * 0.21).sin()) * h;
        let rx = 0.14 * w;
        let ry = 0.26 * h;

        let gaze_x = if looking_away {
            0.9
        } else {
            0.6 * (t * 0.7).sin()
        };
        let gaze_y = 0.3 * (t * 0.45).sin();
        let smile = 0.5 + 0.5 * (t * 0.13).sin();

        let eye_y = cy - 0.25 * ry;
        let eye_dx = 0.4 * rx;
        let eye_rx = 0.22 * rx;
        let eye_ry = 0.1 * ry;
        let pupil_r = (0.4 * eye_ry).max(1.0);
        let brow_y = eye_y - 0.22 * ry - self.brow_flash * 0.08 * ry;
        let mouth_y = cy + 0.45 * ry;
        let mouth_half = 0.35 * rx * (1.0 + 0.4 * smile);

        let mut luma = Vec::with_capacity(self.config.width as usize * self.config.height as usize);
        for py in 0..self.config.height {
            for px in 0..self.config.width {
                let x = px as f64 + 0.5;
                let y = py as f64 + 0.5;
                let mut value = BACKGROUND;

                let fx = (x - cx) / rx;
                let fy = (y - cy) / ry;
                if fx * fx + fy * fy <= 1.0 {
                    value = SKIN - 20.0 * fy;

                    for side in [-1.0, 1.0] {
                        let ex = cx + side * eye_dx;
                        let ux = (x - ex) / eye_rx;
                        let uy = (y - eye_y) / eye_ry;
                        if !blinking && ux * ux + uy * uy <= 1.0 {
                            value = EYE;
                            let pxc = ex + gaze_x * eye_rx * 0.5;
                            let pyc = eye_y + gaze_y * eye_ry * 0.5;
                            if (x - pxc).powi(2) + (y - pyc).powi(2) <= pupil_r * pupil_r {
                                value = PUPIL;
                            }
                        }
                        if (x - ex).abs() <= eye_rx * 1.1 && (y - brow_y).abs() <= 1.0 {
                            value = BROW;
                        }
                    }

                    if (x - cx).abs() <= mouth_half && (y - mouth_y).abs() <= 1.0 {
                        value = MOUTH;
                    }
                }

                if self.config.noise > 0.0 {
                    value += self.rng.gen_range(-self.config.noise..=self.config.noise);
                }
                luma.push(value.clamp(0.0, 255.0) as u8);
            }
        }

        let offset = chrono::Duration::from_std(self.config.frame_interval * seq as u32)
            .unwrap_or_else(|_| chrono::Duration::zero());
        Frame::new(
            seq,
            self.config.start + offset,
            self.config.width,
            self.config.height,
            luma,
        )
    }
}

impl FrameSource for SyntheticFrameSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(CaptureError::Open("synthetic source has zero size".into()));
        }
        self.open = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if !self.open {
            return Err(CaptureError::Read("synthetic source is not open".into()));
        }
        if let Some(max) = self.config.max_frames {
            if self.sequence >= max {
                return Err(CaptureError::Disconnected);
            }
        }
        let frame = self.render()?;
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn describe(&self) -> String {
        format!(
            "synthetic {}x{} (seed {})",
            self.config.width, self.config.height, self.config.seed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(seed: u64) -> SyntheticFrameSource {
        SyntheticFrameSource::new(SyntheticConfig {
            seed,
            start: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            ..SyntheticConfig::default()
        })
    }

    #[test]
    fn test_requires_open() {
        let mut src = source(1);
        assert!(src.next_frame().is_err());
        src.open().unwrap();
        assert!(src.next_frame().unwrap().is_some());
        src.close();
        assert!(!src.is_open());
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = source(42);
        let mut b = source(42);
        a.open().unwrap();
        b.open().unwrap();
        for _ in 0..5 {
            let fa = a.next_frame().unwrap().unwrap();
            let fb = b.next_frame().unwrap().unwrap();
            assert_eq!(fa.luma, fb.luma);
            assert_eq!(fa.timestamp, fb.timestamp);
        }
    }

    #[test]
    fn test_timestamps_advance_by_interval() {
        let mut src = source(3);
        src.open().unwrap();
        let f0 = src.next_frame().unwrap().unwrap();
        let f1 = src.next_frame().unwrap().unwrap();
        assert_eq!((f1.timestamp - f0.timestamp).num_milliseconds(), 100);
        assert_eq!(f1.sequence, 1);
    }

    #[test]
    fn test_face_is_brighter_than_background() {
        let mut src = source(5);
        src.open().unwrap();
        let frame = src.next_frame().unwrap().unwrap();
        let center = frame.pixel(frame.width / 2, frame.height / 2 + 5);
        let corner = frame.pixel(2, 2);
        assert!(center > corner + 60, "center {center} corner {corner}");
    }

    #[test]
    fn test_max_frames_disconnects() {
        let mut src = SyntheticFrameSource::new(SyntheticConfig {
            max_frames: Some(2),
            ..SyntheticConfig::default()
        });
        src.open().unwrap();
        assert!(src.next_frame().unwrap().is_some());
        assert!(src.next_frame().unwrap().is_some());
        assert!(matches!(src.next_frame(), Err(CaptureError::Disconnected)));
    }
}
