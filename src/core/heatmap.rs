//! Attention heatmap synthesis.
//!
//! A batch operation over a history slice. Each sample contributes its own
//! gaze point once; the trail snapshots carried by samples are not re-read,
//! so overlapping trails are never counted twice.

use crate::config::{HeatmapConfig, ScreenSize};
use crate::core::history::History;
use crate::core::sample::{EngagementSample, GazePoint};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Gaze density over the screen, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionHeatmap {
    pub width: u32,
    pub height: u32,
    pub density: Vec<f32>,
    /// Time span covered; `None` when history was empty
    pub window: Option<HeatmapWindow>,
    pub point_count: usize,
    pub peak: f32,
}

impl AttentionHeatmap {
    /// An all-zero grid of the given size.
    pub fn empty(screen: ScreenSize) -> Self {
        Self {
            width: screen.width,
            height: screen.height,
            density: vec![0.0; screen.width as usize * screen.height as usize],
            window: None,
            point_count: 0,
            peak: 0.0,
        }
    }

    #[inline]
    pub fn at(&self, x: u32, y: u32) -> f32 {
        self.density[y as usize * self.width as usize + x as usize]
    }

    pub fn total(&self) -> f64 {
        self.density.iter().map(|&v| v as f64).sum()
    }

    /// Pixel with the highest density, if any point landed.
    pub fn hotspot(&self) -> Option<(u32, u32)> {
        if self.point_count == 0 || self.peak <= 0.0 {
            return None;
        }
        let idx = self
            .density
            .iter()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0;
        Some((idx as u32 % self.width, idx as u32 / self.width))
    }
}

/// Precomputed Gaussian weights for one splat.
struct Kernel {
    radius: i64,
    weights: Vec<f32>,
}

impl Kernel {
    fn new(config: &HeatmapConfig) -> Self {
        let radius = config.radius_px as i64;
        let side = (2 * radius + 1) as usize;
        let two_sigma_sq = 2.0 * config.sigma_px * config.sigma_px;
        let mut weights = vec![0.0f32; side * side];
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let d2 = (dx * dx + dy * dy) as f32;
                if d2 <= (radius * radius) as f32 {
                    let idx = (dy + radius) as usize * side + (dx + radius) as usize;
                    weights[idx] = (-d2 / two_sigma_sq).exp();
                }
            }
        }
        Self { radius, weights }
    }

    fn side(&self) -> usize {
        (2 * self.radius + 1) as usize
    }
}

/// Splat the gaze points of `samples` onto a screen-sized grid.
pub fn generate(
    samples: &[Arc<EngagementSample>],
    screen: ScreenSize,
    config: &HeatmapConfig,
) -> AttentionHeatmap {
    let mut map = AttentionHeatmap::empty(screen);
    if let (Some(first), Some(last)) = (samples.first(), samples.last()) {
        map.window = Some(HeatmapWindow {
            start: first.timestamp,
            end: last.timestamp,
        });
    }

    let points: Vec<GazePoint> = samples.iter().filter_map(|s| s.gaze).collect();
    if points.is_empty() || map.density.is_empty() {
        return map;
    }

    let kernel = Kernel::new(config);
    let side = kernel.side();
    let (w, h) = (screen.width as i64, screen.height as i64);

    for point in &points {
        let weight = point.confidence as f32;
        if weight <= 0.0 {
            continue;
        }
        let cx = (point.x * (w - 1) as f64).round() as i64;
        let cy = (point.y * (h - 1) as f64).round() as i64;

        for dy in -kernel.radius..=kernel.radius {
            let y = cy + dy;
            if y < 0 || y >= h {
                continue;
            }
            let row = y as usize * w as usize;
            let krow = (dy + kernel.radius) as usize * side;
            for dx in -kernel.radius..=kernel.radius {
                let x = cx + dx;
                if x < 0 || x >= w {
                    continue;
                }
                let k = kernel.weights[krow + (dx + kernel.radius) as usize];
                if k > 0.0 {
                    map.density[row + x as usize] += weight * k;
                }
            }
        }
        map.point_count += 1;
    }

    map.peak = map.density.iter().copied().fold(0.0, f32::max);
    map
}

/// Heatmap over the samples within `window` of the latest history entry.
pub fn from_history(
    history: &History,
    window: Duration,
    screen: ScreenSize,
    config: &HeatmapConfig,
) -> AttentionHeatmap {
    generate(&history.within(window), screen, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sample::fixtures;
    use chrono::TimeZone;

    fn screen() -> ScreenSize {
        ScreenSize {
            width: 320,
            height: 200,
        }
    }

    fn sample_with_gaze(ms: i64, gaze: Option<GazePoint>) -> Arc<EngagementSample> {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap();
        let mut sample = fixtures::sample("s", ts);
        sample.gaze = gaze;
        Arc::new(sample)
    }

    #[test]
    fn test_empty_window_is_all_zero() {
        let map = from_history(
            &History::new(10),
            Duration::seconds(30),
            screen(),
            &HeatmapConfig::default(),
        );
        assert_eq!(map.width, 320);
        assert_eq!(map.height, 200);
        assert_eq!(map.density.len(), 320 * 200);
        assert!(map.density.iter().all(|&v| v == 0.0));
        assert_eq!(map.point_count, 0);
        assert!(map.hotspot().is_none());
    }

    #[test]
    fn test_samples_without_gaze_are_zero() {
        let samples = vec![sample_with_gaze(0, None), sample_with_gaze(100, None)];
        let map = generate(&samples, screen(), &HeatmapConfig::default());
        assert!(map.window.is_some());
        assert_eq!(map.total(), 0.0);
    }

    #[test]
    fn test_single_point_peaks_at_gaze() {
        let samples = vec![sample_with_gaze(0, Some(GazePoint::new(0.5, 0.5, 0, 1.0)))];
        let map = generate(&samples, screen(), &HeatmapConfig::default());
        let (hx, hy) = map.hotspot().unwrap();
        assert_eq!((hx, hy), (160, 100));
        assert!((map.peak - 1.0).abs() < 1e-6);
        // Outside the kernel radius nothing lands.
        assert_eq!(map.at(160 + 60, 100), 0.0);
        assert!(map.at(160 + 20, 100) > 0.0);
    }

    #[test]
    fn test_confidence_weights_contribution() {
        let strong = generate(
            &[sample_with_gaze(0, Some(GazePoint::new(0.3, 0.3, 0, 1.0)))],
            screen(),
            &HeatmapConfig::default(),
        );
        let weak = generate(
            &[sample_with_gaze(0, Some(GazePoint::new(0.3, 0.3, 0, 0.25)))],
            screen(),
            &HeatmapConfig::default(),
        );
        assert!((weak.total() * 4.0 - strong.total()).abs() < 1e-3);
    }

    #[test]
    fn test_generation_is_deterministic_and_read_only() {
        let mut history = History::new(50);
        for i in 0..20 {
            let x = 0.2 + 0.03 * i as f64;
            history.push(sample_with_gaze(i * 100, Some(GazePoint::new(x, 0.4, i * 100, 0.8))));
        }
        let before = history.snapshot();
        let a = from_history(&history, Duration::seconds(1), screen(), &HeatmapConfig::default());
        let b = from_history(&history, Duration::seconds(1), screen(), &HeatmapConfig::default());
        assert_eq!(a, b);
        assert_eq!(a.point_count, 11);
        assert_eq!(history.snapshot(), before);
    }
}
