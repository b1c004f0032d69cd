//! Bounded gaze trail with fixation/saccade labelling.

use crate::core::sample::GazePoint;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeClassifierConfig {
    /// Speeds above this (screen-widths per second) are saccades
    pub saccade_speed_threshold: f64,
    /// Consecutive fixation points within this distance extend one fixation
    pub fixation_radius: f64,
}

impl Default for GazeClassifierConfig {
    fn default() -> Self {
        Self {
            saccade_speed_threshold: 1.5,
            fixation_radius: 0.05,
        }
    }
}

/// Append-only trail of the most recent gaze points.
#[derive(Debug)]
pub struct GazeTrail {
    capacity: usize,
    points: VecDeque<GazePoint>,
    classifier: GazeClassifierConfig,
    fixation_anchor: Option<(f64, f64, i64)>,
}

impl GazeTrail {
    pub fn new(capacity: usize, classifier: GazeClassifierConfig) -> Self {
        Self {
            capacity: capacity.max(1),
            points: VecDeque::with_capacity(capacity.max(1)),
            classifier,
            fixation_anchor: None,
        }
    }

    /// Label a raw point against the previous one and append it.
    pub fn push(&mut self, mut point: GazePoint) -> GazePoint {
        point.fixation_duration_ms = None;
        point.saccade_speed = None;

        match self.points.back() {
            Some(prev) => {
                let dt = (point.timestamp_ms - prev.timestamp_ms).max(1) as f64 / 1000.0;
                let dist = ((point.x - prev.x).powi(2) + (point.y - prev.y).powi(2)).sqrt();
                let speed = dist / dt;

                if speed > self.classifier.saccade_speed_threshold {
                    point.saccade_speed = Some(speed);
                    self.fixation_anchor = None;
                } else {
                    let anchor = match self.fixation_anchor {
                        Some((ax, ay, start))
                            if ((point.x - ax).powi(2) + (point.y - ay).powi(2)).sqrt()
                                <= self.classifier.fixation_radius =>
                        {
                            (ax, ay, start)
                        }
                        _ => (point.x, point.y, prev.timestamp_ms),
                    };
                    self.fixation_anchor = Some(anchor);
                    point.fixation_duration_ms = Some((point.timestamp_ms - anchor.2) as f64);
                }
            }
            None => {
                self.fixation_anchor = Some((point.x, point.y, point.timestamp_ms));
                point.fixation_duration_ms = Some(0.0);
            }
        }

        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
        point
    }

    /// Copy of the retained points, oldest first.
    pub fn snapshot(&self) -> Vec<GazePoint> {
        self.points.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.fixation_anchor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trail(capacity: usize) -> GazeTrail {
        GazeTrail::new(capacity, GazeClassifierConfig::default())
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut t = trail(100);
        for i in 0..250 {
            t.push(GazePoint::new(0.5, 0.5, i * 100, 0.9));
        }
        assert_eq!(t.len(), 100);
        assert_eq!(t.snapshot()[0].timestamp_ms, 150 * 100);
    }

    #[test]
    fn test_fixation_accumulates() {
        let mut t = trail(10);
        t.push(GazePoint::new(0.5, 0.5, 0, 0.9));
        t.push(GazePoint::new(0.51, 0.5, 100, 0.9));
        let p = t.push(GazePoint::new(0.5, 0.51, 200, 0.9));
        assert_eq!(p.fixation_duration_ms, Some(200.0));
        assert!(!p.is_saccade());
    }

    #[test]
    fn test_saccade_breaks_fixation() {
        let mut t = trail(10);
        t.push(GazePoint::new(0.1, 0.1, 0, 0.9));
        let p = t.push(GazePoint::new(0.8, 0.7, 100, 0.9));
        assert!(p.is_saccade());
        assert!(p.saccade_speed.unwrap() > 1.5);

        let p = t.push(GazePoint::new(0.8, 0.7, 200, 0.9));
        assert_eq!(p.fixation_duration_ms, Some(100.0));
    }
}
