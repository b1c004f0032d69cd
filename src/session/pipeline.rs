//! One analysis tick: frame → modules → fusion → calibration → publish.

use super::SessionShared;
use crate::calibration::{adjust, profiles, Calibrator, DEFAULT_PROFILE};
use crate::config::Config;
use crate::core::distraction::{DistractionTracker, TickObservation};
use crate::core::events::detect as detect_critical_events;
use crate::core::gaze_trail::GazeTrail;
use crate::core::history::{compute_blink_stats, TemporalFeatureStore, TemporalFeatures};
use crate::core::sample::{CulturalContext, EngagementSample, SamplePhase};
use crate::error::{CaptureError, InferenceError};
use crate::inference::face::FaceInput;
use crate::inference::{
    describe_face, run_guarded, Cognitive, Emotion, Face, FrameInput, Fusion, FusionInput, Gaze,
    InferenceStack, Micro, Modality, Posture,
};
use crate::model::TensorPool;
use crate::session::stats::SessionCounters;
use crate::source::{Frame, FrameSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Processed,
    /// No frame this tick
    Skipped,
    /// The source is gone; the session must end
    CaptureLost(String),
}

/// Per-session pipeline state. Owned by the scheduler thread.
pub(crate) struct Pipeline {
    source: Box<dyn FrameSource>,
    source_open: bool,
    stack: InferenceStack,
    pool: TensorPool,
    features: TemporalFeatureStore,
    trail: GazeTrail,
    calibrator: Calibrator,
    distraction: DistractionTracker,
    config: Config,
    shared: Arc<SessionShared>,
    requested_tag: String,
    sequence: u64,
    consecutive_failures: u32,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Pipeline {
    /// `source` must already be open and `calibrator` started.
    pub(crate) fn new(
        source: Box<dyn FrameSource>,
        stack: InferenceStack,
        pool: TensorPool,
        calibrator: Calibrator,
        config: Config,
        shared: Arc<SessionShared>,
    ) -> Self {
        Self {
            source,
            source_open: true,
            stack,
            pool,
            features: TemporalFeatureStore::new(config.feature_window),
            trail: GazeTrail::new(config.gaze_trail_capacity, config.gaze),
            requested_tag: calibrator.requested_tag().to_string(),
            calibrator,
            distraction: DistractionTracker::new(config.distraction),
            config,
            shared,
            sequence: 0,
            consecutive_failures: 0,
            last_timestamp: None,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    /// Release the frame source and close any pending distraction episode
    /// at the last frame time. Safe to call more than once.
    pub(crate) fn close(&mut self) {
        if !self.source_open {
            return;
        }
        self.source.close();
        self.source_open = false;
        info!(source = %self.source.describe(), "Frame source closed");

        if let Some(event) = self.last_timestamp.and_then(|at| self.distraction.flush(at)) {
            info!(
                kind = ?event.kind,
                duration_ms = event.duration_ms,
                "Closing open distraction episode"
            );
            self.shared.counters.record_distraction_events(1);
            self.shared.record_final_distraction(event);
        }
    }

    pub(crate) fn tick(&mut self) -> TickOutcome {
        self.shared.counters.record_tick();

        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => {
                self.consecutive_failures = 0;
                frame
            }
            Ok(None) => {
                self.shared.counters.record_skipped();
                debug!("No frame ready, skipping tick");
                return TickOutcome::Skipped;
            }
            Err(CaptureError::Disconnected) => {
                return TickOutcome::CaptureLost(CaptureError::Disconnected.to_string());
            }
            Err(err) => {
                self.shared.counters.record_capture_error();
                self.consecutive_failures += 1;
                warn!(
                    error = %err,
                    consecutive = self.consecutive_failures,
                    "Frame read failed"
                );
                if self.consecutive_failures >= self.config.max_capture_failures {
                    return TickOutcome::CaptureLost(format!(
                        "{} consecutive read failures, last: {err}",
                        self.consecutive_failures
                    ));
                }
                return TickOutcome::Skipped;
            }
        };

        self.shared.counters.record_frame();
        self.process(&frame);
        TickOutcome::Processed
    }

    fn process(&mut self, frame: &Frame) {
        let timestamp = frame.timestamp;
        self.last_timestamp = Some(timestamp);
        let counters = &self.shared.counters;
        let stack = &self.stack;
        let pool = &self.pool;
        let window = self.features.window();

        let face = recover::<Face>(
            run_guarded::<Face>(
                stack.face.as_ref(),
                &FaceInput {
                    frame,
                    window: &window,
                },
                pool,
            ),
            timestamp,
            counters,
        );
        let crop = if face.detected {
            frame.crop(face.x, face.y, face.width, face.height)
        } else {
            None
        };
        let activity = crop.as_ref().map(describe_face).unwrap_or_default();

        let input = FrameInput {
            frame,
            face: &face,
            crop: crop.as_ref(),
            activity: &activity,
            window: &window,
            timestamp,
        };
        let ((emotion, gaze), ((posture, micro), cognitive)) = rayon::join(
            || {
                rayon::join(
                    || run_guarded::<Emotion>(stack.emotion.as_ref(), &input, pool),
                    || run_guarded::<Gaze>(stack.gaze.as_ref(), &input, pool),
                )
            },
            || {
                rayon::join(
                    || {
                        rayon::join(
                            || run_guarded::<Posture>(stack.posture.as_ref(), &input, pool),
                            || run_guarded::<Micro>(stack.micro.as_ref(), &input, pool),
                        )
                    },
                    || run_guarded::<Cognitive>(stack.cognitive.as_ref(), &input, pool),
                )
            },
        );
        let emotion = recover::<Emotion>(emotion, timestamp, counters);
        let gaze = recover::<Gaze>(gaze, timestamp, counters);
        let posture = recover::<Posture>(posture, timestamp, counters);
        let micro = recover::<Micro>(micro, timestamp, counters);
        let cognitive = recover::<Cognitive>(cognitive, timestamp, counters);

        let mut eye_series: Vec<(i64, f64)> = window
            .recent(window.len())
            .iter()
            .filter(|f| f.face_present > 0.5)
            .map(|f| (f.timestamp_ms, f.eye_openness))
            .collect();
        if face.detected {
            eye_series.push((timestamp.timestamp_millis(), activity.eye_openness));
        }
        let blink = compute_blink_stats(&eye_series);

        let fusion = recover::<Fusion>(
            run_guarded::<Fusion>(
                stack.fusion.as_ref(),
                &FusionInput {
                    face: &face,
                    activity: &activity,
                    emotion: &emotion,
                    gaze: &gaze,
                    posture: &posture,
                    micro: &micro,
                    cognitive: &cognitive,
                    blink: &blink,
                    window: &window,
                    timestamp,
                },
                pool,
            ),
            timestamp,
            counters,
        );
        drop(crop);

        let gaze_point = gaze.point.map(|p| self.trail.push(p));
        let headline = fusion.headline;
        let mut raw = EngagementSample {
            subject_id: self.shared.subject_id.clone(),
            timestamp,
            sequence: self.sequence,
            phase: SamplePhase::Active,
            overall_engagement: headline.overall_engagement,
            attention_level: headline.attention_level,
            cognitive_load: headline.cognitive_load,
            fatigue_level: headline.fatigue_level,
            distraction_probability: headline.distraction_probability,
            emotional_state: emotion,
            posture,
            blink_stats: blink,
            neuro_indicators: fusion.neuro,
            distraction_events: Vec::new(),
            gaze: gaze_point,
            gaze_trail: self.trail.snapshot(),
            micro_expressions: micro.expressions,
            cultural_context: CulturalContext {
                requested_tag: self.requested_tag.clone(),
                profile: String::new(),
                personal_baseline: false,
            },
            face,
            facial_activity: activity,
        };
        raw.clamp_bounded();
        self.sequence += 1;

        // Module windows see raw features, independent of calibration.
        self.features.push(TemporalFeatures::from_sample(&raw));

        let calibrating = self.calibrator.advance(timestamp);
        let mut sample = {
            let profile = match self.calibrator.profile() {
                Some(profile) => profile,
                None => profiles::global().lookup(DEFAULT_PROFILE),
            };
            let baseline = self
                .calibrator
                .calibration()
                .and_then(|c| c.baseline.as_ref());
            adjust(&raw, profile, baseline, &self.config.adjustment)
        };
        sample.phase = if calibrating {
            SamplePhase::Calibrating
        } else {
            SamplePhase::Active
        };

        sample.distraction_events = self.distraction.observe(&TickObservation {
            timestamp,
            face_detected: face.detected,
            gaze: sample.gaze,
            yaw: sample.posture.head_pose.yaw,
            eye_openness: activity.eye_openness,
            attention: sample.attention_level,
        });
        self.shared
            .counters
            .record_distraction_events(sample.distraction_events.len() as u64);

        let sample = Arc::new(sample);
        let critical = if calibrating {
            self.calibrator.record(Arc::clone(&sample));
            Vec::new()
        } else {
            detect_critical_events(&sample, &self.config.thresholds)
        };
        self.shared
            .counters
            .record_critical_events(critical.len() as u64);

        self.shared.commit(
            &sample,
            &critical,
            !calibrating,
            self.calibrator.state(),
            self.calibrator.calibration().cloned(),
        );

        debug!(
            sequence = sample.sequence,
            attention = sample.attention_level,
            engagement = sample.overall_engagement,
            face = face.detected,
            calibrating,
            "Tick processed"
        );

        self.shared.publish(&sample, &critical);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close();
    }
}

/// Substitute the module's neutral reading for a failed estimate.
fn recover<M: Modality>(
    result: Result<M::Output, InferenceError>,
    tick: DateTime<Utc>,
    counters: &SessionCounters,
) -> M::Output {
    match result {
        Ok(output) => output,
        Err(err) => {
            warn!(
                module = M::NAME,
                tick = %tick,
                error = %err,
                "Module failed, using neutral reading"
            );
            counters.record_inference_error();
            M::neutral()
        }
    }
}
