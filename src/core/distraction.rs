//! Distraction episode tracking.
//!
//! An episode opens when one of the distraction conditions holds for the
//! current tick and closes when it clears. The event is emitted once
//! attention has recovered to a fraction of its pre-distraction level, or
//! when the recovery wait times out, so `recovery_ms` is always known.

use crate::core::sample::{clamp_unit, DistractionEvent, DistractionKind, GazePoint, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistractionConfig {
    /// Episodes shorter than this are discarded
    pub min_distraction_ms: i64,
    /// Absolute yaw (degrees) beyond which the head counts as turned away
    pub head_turn_yaw_deg: f64,
    /// Eye openness below which the learner counts as drowsy
    pub drowsy_eye_openness: f64,
    /// Gaze confidence below which gaze counts as lost
    pub min_gaze_confidence: f64,
    /// Fraction of pre-distraction attention that counts as recovered
    pub recovery_ratio: f64,
    /// Upper bound on the recovery wait
    pub max_recovery_ms: i64,
}

impl Default for DistractionConfig {
    fn default() -> Self {
        Self {
            min_distraction_ms: 300,
            head_turn_yaw_deg: 35.0,
            drowsy_eye_openness: 0.2,
            min_gaze_confidence: 0.2,
            recovery_ratio: 0.9,
            max_recovery_ms: 10_000,
        }
    }
}

/// What the tracker needs from one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickObservation {
    pub timestamp: DateTime<Utc>,
    pub face_detected: bool,
    pub gaze: Option<GazePoint>,
    pub yaw: f64,
    pub eye_openness: f64,
    pub attention: f64,
}

#[derive(Debug, Clone, Copy)]
enum TrackerState {
    Idle,
    Distracted {
        kind: DistractionKind,
        start: DateTime<Utc>,
        pre_attention: f64,
        attention_sum: f64,
        ticks: u32,
    },
    Recovering {
        kind: DistractionKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        pre_attention: f64,
        mean_attention: f64,
    },
}

#[derive(Debug)]
pub struct DistractionTracker {
    config: DistractionConfig,
    state: TrackerState,
    attention_ema: Option<f64>,
}

impl DistractionTracker {
    pub fn new(config: DistractionConfig) -> Self {
        Self {
            config,
            state: TrackerState::Idle,
            attention_ema: None,
        }
    }

    /// Which condition, if any, holds for this tick.
    pub fn classify(&self, obs: &TickObservation) -> Option<DistractionKind> {
        if !obs.face_detected {
            return Some(DistractionKind::FaceAbsent);
        }
        if obs.yaw.abs() > self.config.head_turn_yaw_deg {
            return Some(DistractionKind::HeadTurned);
        }
        if obs.eye_openness < self.config.drowsy_eye_openness {
            return Some(DistractionKind::Drowsiness);
        }
        match obs.gaze {
            Some(g) if g.confidence >= self.config.min_gaze_confidence => {
                let off_screen = g.x <= 0.0 || g.x >= 1.0 || g.y <= 0.0 || g.y >= 1.0;
                off_screen.then_some(DistractionKind::GazeAway)
            }
            _ => Some(DistractionKind::GazeAway),
        }
    }

    /// Advance the tracker by one tick, returning events finalized on it.
    pub fn observe(&mut self, obs: &TickObservation) -> Vec<DistractionEvent> {
        let mut events = Vec::new();
        let condition = self.classify(obs);

        self.state = match (self.state, condition) {
            (TrackerState::Idle, None) => {
                self.track_attention(obs.attention);
                TrackerState::Idle
            }
            (TrackerState::Idle, Some(kind)) => self.open(kind, obs),
            (
                TrackerState::Distracted {
                    kind,
                    start,
                    pre_attention,
                    attention_sum,
                    ticks,
                },
                Some(_),
            ) => TrackerState::Distracted {
                kind,
                start,
                pre_attention,
                attention_sum: attention_sum + obs.attention,
                ticks: ticks + 1,
            },
            (
                TrackerState::Distracted {
                    kind,
                    start,
                    pre_attention,
                    attention_sum,
                    ticks,
                },
                None,
            ) => {
                let duration = (obs.timestamp - start).num_milliseconds();
                if duration < self.config.min_distraction_ms {
                    TrackerState::Idle
                } else {
                    TrackerState::Recovering {
                        kind,
                        start,
                        end: obs.timestamp,
                        pre_attention,
                        mean_attention: attention_sum / ticks.max(1) as f64,
                    }
                }
            }
            (
                recovering @ TrackerState::Recovering {
                    kind,
                    start,
                    end,
                    pre_attention,
                    mean_attention,
                },
                condition,
            ) => {
                let waited = (obs.timestamp - end).num_milliseconds();
                let recovered = obs.attention >= pre_attention * self.config.recovery_ratio;

                if condition.is_some() || recovered || waited >= self.config.max_recovery_ms {
                    events.push(self.finalize(
                        kind,
                        start,
                        end,
                        pre_attention,
                        mean_attention,
                        waited.min(self.config.max_recovery_ms),
                    ));
                    match condition {
                        Some(next) => self.open(next, obs),
                        None => {
                            self.track_attention(obs.attention);
                            TrackerState::Idle
                        }
                    }
                } else {
                    recovering
                }
            }
        };

        events
    }

    fn open(&self, kind: DistractionKind, obs: &TickObservation) -> TrackerState {
        TrackerState::Distracted {
            kind,
            start: obs.timestamp,
            pre_attention: self.attention_ema.unwrap_or(obs.attention),
            attention_sum: obs.attention,
            ticks: 1,
        }
    }

    fn track_attention(&mut self, attention: f64) {
        self.attention_ema = Some(match self.attention_ema {
            Some(prev) => prev * 0.8 + attention * 0.2,
            None => attention,
        });
    }

    fn finalize(
        &self,
        kind: DistractionKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        pre_attention: f64,
        mean_attention: f64,
        recovery_ms: i64,
    ) -> DistractionEvent {
        let duration_ms = (end - start).num_milliseconds();
        let severity = if duration_ms < 2_000 {
            Severity::Low
        } else if duration_ms < 8_000 {
            Severity::Medium
        } else {
            Severity::High
        };
        let attention_drop = (pre_attention - mean_attention).max(0.0);
        let impact = clamp_unit(0.6 * (duration_ms as f64 / 10_000.0).min(1.0) + 0.4 * attention_drop);

        DistractionEvent {
            timestamp: start,
            kind,
            duration_ms,
            severity,
            impact,
            recovery_ms: recovery_ms.max(0),
        }
    }

    /// Close whatever episode is still pending at `now`, when the session ends.
    ///
    /// An open episode ends at `now` with zero recovery time. One awaiting
    /// recovery keeps its end and reports the wait so far. Open episodes
    /// shorter than `min_distraction_ms` are discarded as usual.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Option<DistractionEvent> {
        let state = std::mem::replace(&mut self.state, TrackerState::Idle);
        match state {
            TrackerState::Idle => None,
            TrackerState::Distracted {
                kind,
                start,
                pre_attention,
                attention_sum,
                ticks,
            } => {
                let duration = (now - start).num_milliseconds();
                (duration >= self.config.min_distraction_ms).then(|| {
                    let mean_attention = attention_sum / ticks.max(1) as f64;
                    self.finalize(kind, start, now, pre_attention, mean_attention, 0)
                })
            }
            TrackerState::Recovering {
                kind,
                start,
                end,
                pre_attention,
                mean_attention,
            } => {
                let waited = (now - end).num_milliseconds();
                Some(self.finalize(
                    kind,
                    start,
                    end,
                    pre_attention,
                    mean_attention,
                    waited.min(self.config.max_recovery_ms),
                ))
            }
        }
    }

    /// Whether an episode is currently open or awaiting recovery.
    pub fn is_distracted(&self) -> bool {
        !matches!(self.state, TrackerState::Idle)
    }
}
