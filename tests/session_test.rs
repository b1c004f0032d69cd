//! Integration tests for tracking sessions

use chrono::{DateTime, TimeZone, Utc};
use crossbeam_channel::Receiver;
use engagement_monitor::core::{DistractionKind, EmotionTag, SamplePhase, Severity};
use engagement_monitor::model::{Backend, Tensor};
use engagement_monitor::session::{
    ChannelObserver, EngagementObserver, SessionEndReason, SessionEvent, SessionState,
};
use engagement_monitor::{
    CalibrationState, CaptureError, Config, EngagementError, EngagementSample, EngagementService,
    Frame, FrameSource, InferenceModel, NoModelStore, StaticModelStore, SyntheticConfig,
    SyntheticFrameSource, TrackingSession,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn start_time() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
}

fn fast_config() -> Config {
    Config {
        tick_interval: Duration::from_millis(5),
        calibration_duration: Duration::from_secs(1),
        ..Config::default()
    }
}

/// Synthetic frames 100 ms apart, ending after `frames`.
fn synthetic(seed: u64, frames: u64) -> SyntheticFrameSource {
    SyntheticFrameSource::new(SyntheticConfig {
        seed,
        start: start_time(),
        max_frames: Some(frames),
        ..SyntheticConfig::default()
    })
}

/// Counts open/close calls on the wrapped source.
struct Tracked<S> {
    inner: S,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl<S> Tracked<S> {
    fn new(inner: S) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                opens: opens.clone(),
                closes: closes.clone(),
            },
            opens,
            closes,
        )
    }
}

impl<S: FrameSource> FrameSource for Tracked<S> {
    fn open(&mut self) -> Result<(), CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        self.inner.next_frame()
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close()
    }
}

/// A source whose reads always fail.
struct BrokenSource;

impl FrameSource for BrokenSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        Err(CaptureError::Read("sensor timeout".into()))
    }

    fn close(&mut self) {}
}

/// Takes `delay` per read and records reads that overlap or race `close`.
struct SlowSource {
    inner: SyntheticFrameSource,
    delay: Duration,
    busy: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
    closed_while_busy: Arc<AtomicUsize>,
}

impl FrameSource for SlowSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        self.inner.open()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        std::thread::sleep(self.delay);
        let frame = self.inner.next_frame();
        self.busy.store(false, Ordering::SeqCst);
        frame
    }

    fn close(&mut self) {
        if self.busy.load(Ordering::SeqCst) {
            self.closed_while_busy.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.close()
    }
}

/// Uniform grey frames 100 ms apart: no face is ever found.
struct BlankSource {
    next: u64,
    frames: u64,
}

impl FrameSource for BlankSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.next == self.frames {
            return Err(CaptureError::Disconnected);
        }
        let sequence = self.next;
        self.next += 1;
        let timestamp = start_time() + chrono::Duration::milliseconds(sequence as i64 * 100);
        Frame::new(sequence, timestamp, 64, 48, vec![128; 64 * 48]).map(Some)
    }

    fn close(&mut self) {}
}

struct UnopenableSource;

impl FrameSource for UnopenableSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        Err(CaptureError::Open("no camera".into()))
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        Ok(None)
    }

    fn close(&mut self) {}
}

struct FailingModel {
    output_len: usize,
}

impl InferenceModel for FailingModel {
    fn output_len(&self) -> usize {
        self.output_len
    }

    fn run(&self, _input: &Tensor) -> Result<Vec<f32>, String> {
        Err("runtime error".into())
    }
}

struct PanickingModel {
    output_len: usize,
}

impl InferenceModel for PanickingModel {
    fn output_len(&self) -> usize {
        self.output_len
    }

    fn run(&self, _input: &Tensor) -> Result<Vec<f32>, String> {
        panic!("model crashed")
    }
}

fn start(
    config: Config,
    source: impl FrameSource + 'static,
    tag: &str,
) -> (TrackingSession, Receiver<SessionEvent>) {
    let service = EngagementService::new(config, Arc::new(NoModelStore));
    start_with(&service, source, tag)
}

fn start_with(
    service: &EngagementService,
    source: impl FrameSource + 'static,
    tag: &str,
) -> (TrackingSession, Receiver<SessionEvent>) {
    let (observer, rx) = ChannelObserver::new(4096);
    let observer: Arc<dyn EngagementObserver> = Arc::new(observer);
    let session = service
        .start_tracking_with(Box::new(source), "learner-1", tag, vec![observer])
        .expect("session should start");
    (session, rx)
}

/// Drain events until the session ends.
fn wait_for_end(rx: &Receiver<SessionEvent>) -> (Vec<Arc<EngagementSample>>, SessionEndReason) {
    let mut updates = Vec::new();
    loop {
        match rx.recv_timeout(Duration::from_secs(10)) {
            Ok(SessionEvent::Update(sample)) => updates.push(sample),
            Ok(SessionEvent::Critical(..)) => {}
            Ok(SessionEvent::Ended(reason)) => return (updates, reason),
            Err(e) => panic!("session did not end: {e}"),
        }
    }
}

fn assert_unit(value: f64, field: &str) {
    assert!((0.0..=1.0).contains(&value), "{field} out of range: {value}");
}

#[test]
fn test_session_runs_until_source_disconnects() {
    let (source, opens, closes) = Tracked::new(synthetic(3, 40));
    let (session, rx) = start(fast_config(), source, "general");

    let (updates, reason) = wait_for_end(&rx);
    assert!(matches!(reason, SessionEndReason::CaptureLost { .. }));
    session.stop();

    assert_eq!(session.state(), SessionState::Failed);
    assert!(!session.is_running());
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // Frames 0..10 fall in the one-second calibration window.
    assert_eq!(updates.len(), 40);
    assert!(updates[..10].iter().all(|s| s.phase == SamplePhase::Calibrating));
    assert!(updates[10..].iter().all(|s| s.phase == SamplePhase::Active));

    let history = session.history();
    assert_eq!(history.len(), 30);
    let sequences: Vec<u64> = history.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, (10..40).collect::<Vec<_>>());

    let stats = session.stats();
    assert_eq!(stats.counters.frames, 40);
    assert_eq!(stats.counters.published, 40);
    assert_eq!(stats.history_size, 30);
    assert_eq!(stats.models_loaded, 0);
    assert_eq!(stats.models.len(), 7);
    assert_eq!(stats.calibration_state, CalibrationState::Calibrated);
    assert_eq!(session.tensor_pool().live(), 0);
}

#[test]
fn test_stop_right_after_start_releases_source() {
    let (source, opens, closes) = Tracked::new(SyntheticFrameSource::with_seed(5));
    let (session, rx) = start(fast_config(), source, "general");

    session.stop();
    session.stop();

    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(!session.is_running());
    assert_eq!(session.tensor_pool().live(), 0);

    let ended: Vec<SessionEndReason> = rx
        .try_iter()
        .filter_map(|e| match e {
            SessionEvent::Ended(reason) => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(ended, vec![SessionEndReason::Stopped]);
}

#[test]
fn test_dropping_session_stops_it() {
    let (source, _opens, closes) = Tracked::new(SyntheticFrameSource::with_seed(6));
    let (session, _rx) = start(fast_config(), source, "general");
    drop(session);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_same_frames_same_fused_output() {
    let run = || {
        let (session, rx) = start(fast_config(), synthetic(17, 30), "western");
        let (updates, _) = wait_for_end(&rx);
        session.stop();
        updates
    };

    let a = run();
    let b = run();
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.sequence, y.sequence);
        assert_eq!(x.timestamp, y.timestamp);
        assert_eq!(x.overall_engagement, y.overall_engagement);
        assert_eq!(x.attention_level, y.attention_level);
        assert_eq!(x.cognitive_load, y.cognitive_load);
        assert_eq!(x.fatigue_level, y.fatigue_level);
        assert_eq!(x.distraction_probability, y.distraction_probability);
        assert_eq!(x.emotional_state, y.emotional_state);
        assert_eq!(x.gaze, y.gaze);
    }
}

#[test]
fn test_heatmap_is_empty_before_calibration_ends() {
    let config = Config {
        calibration_duration: Duration::from_secs(60),
        ..fast_config()
    };
    let (session, rx) = start(config, synthetic(9, 5), "general");
    let (updates, _) = wait_for_end(&rx);
    session.stop();

    assert_eq!(updates.len(), 5);
    assert!(session.history().is_empty());
    assert_eq!(session.calibration_state(), CalibrationState::Calibrating);
    assert!(session.calibration().is_none());
    let current = session.current_sample().expect("current sample");
    assert_eq!(current.phase, SamplePhase::Calibrating);

    let heatmap = session.generate_attention_heatmap(chrono::Duration::seconds(30));
    assert_eq!(heatmap.point_count, 0);
    assert!(heatmap.window.is_none());
    assert!(heatmap.density.iter().all(|&d| d == 0.0));

    let report = session.report();
    assert_eq!(report.sample_count, 0);
}

#[test]
fn test_calibration_completes_once_with_personal_baseline() {
    let (session, rx) = start(fast_config(), synthetic(21, 25), "East-Asian");
    wait_for_end(&rx);
    session.stop();

    let calibration = session.calibration().expect("calibration");
    assert_eq!(calibration.requested_tag, "East-Asian");
    assert_eq!(calibration.profile.tag, "east_asian");
    let baseline = calibration.baseline.as_ref().expect("baseline");
    assert_eq!(baseline.sample_count, 10);

    for sample in session.history() {
        assert_eq!(sample.cultural_context.profile, "east_asian");
        assert!(sample.cultural_context.personal_baseline);
        assert!(sample.emotional_state.culturally_adjusted);
    }
}

#[test]
fn test_unknown_culture_falls_back_to_general() {
    let (session, rx) = start(fast_config(), synthetic(2, 15), "atlantis");
    wait_for_end(&rx);
    session.stop();

    let calibration = session.calibration().expect("calibration");
    assert_eq!(calibration.profile.tag, "general");
    assert_eq!(calibration.requested_tag, "atlantis");
}

#[test]
fn test_zero_calibration_window_records_every_sample() {
    let config = Config {
        calibration_duration: Duration::ZERO,
        history_capacity: 8,
        ..fast_config()
    };
    let (session, rx) = start(config, synthetic(4, 40), "general");
    wait_for_end(&rx);
    session.stop();

    let calibration = session.calibration().expect("calibration");
    assert!(calibration.baseline.is_none());

    let history = session.history();
    assert_eq!(history.len(), 8);
    let sequences: Vec<u64> = history.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, (32..40).collect::<Vec<_>>());
    assert!(history.iter().all(|s| !s.cultural_context.personal_baseline));
}

#[test]
fn test_every_published_scalar_is_bounded() {
    let (session, rx) = start(fast_config(), synthetic(13, 60), "latin_american");
    let (updates, _) = wait_for_end(&rx);
    session.stop();

    for s in &updates {
        assert_unit(s.overall_engagement, "overall_engagement");
        assert_unit(s.attention_level, "attention_level");
        assert_unit(s.cognitive_load, "cognitive_load");
        assert_unit(s.fatigue_level, "fatigue_level");
        assert_unit(s.distraction_probability, "distraction_probability");
        assert_unit(s.emotional_state.intensity, "intensity");
        assert_unit(s.emotional_state.confidence, "emotion confidence");
        assert_unit(s.posture.ergonomic_score, "ergonomic_score");
        assert_unit(s.blink_stats.perclos, "perclos");
        assert_unit(s.face.confidence, "face confidence");
        if let Some(gaze) = s.gaze {
            assert_unit(gaze.x, "gaze x");
            assert_unit(gaze.y, "gaze y");
        }
        assert!(s.gaze_trail.len() <= Config::default().gaze_trail_capacity);
    }
}

#[test]
fn test_failing_models_do_not_end_the_session() {
    let store = StaticModelStore::new()
        .with_model("emotion_classifier", Arc::new(FailingModel { output_len: 13 }))
        .with_model("gaze_estimator", Arc::new(PanickingModel { output_len: 4 }));
    let service = EngagementService::new(fast_config(), Arc::new(store));
    let (session, rx) = start_with(&service, synthetic(8, 20), "general");

    let (updates, reason) = wait_for_end(&rx);
    session.stop();

    assert!(matches!(reason, SessionEndReason::CaptureLost { .. }));
    assert_eq!(updates.len(), 20);
    for s in &updates {
        assert_eq!(s.emotional_state.primary_emotion, EmotionTag::Neutral);
        assert!(s.gaze.is_none());
    }

    let stats = session.stats();
    assert_eq!(stats.models_loaded, 2);
    let emotion = stats.models.iter().find(|m| m.module == "emotion").unwrap();
    assert_eq!(emotion.backend, Backend::Model);
    assert_eq!(stats.counters.inference_errors, 40);
    assert_eq!(session.tensor_pool().live(), 0);
}

#[test]
fn test_repeated_read_failures_abort_the_session() {
    let config = Config {
        max_capture_failures: 3,
        ..fast_config()
    };
    let (session, rx) = start(config, BrokenSource, "general");

    let (updates, reason) = wait_for_end(&rx);
    session.stop();

    assert!(updates.is_empty());
    match reason {
        SessionEndReason::CaptureLost { reason } => assert!(reason.contains("sensor timeout")),
        other => panic!("unexpected end: {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.stats().counters.capture_errors, 3);
}

#[test]
fn test_start_fails_when_source_cannot_open() {
    let service = EngagementService::new(fast_config(), Arc::new(NoModelStore));
    let err = service
        .start_tracking(Box::new(UnopenableSource), "learner-1", "general")
        .err()
        .expect("start should fail");
    assert!(matches!(err, EngagementError::Capture(CaptureError::Open(_))));
}

#[test]
fn test_start_rejects_invalid_config() {
    let config = Config {
        tick_interval: Duration::ZERO,
        ..Config::default()
    };
    let (source, opens, _) = Tracked::new(SyntheticFrameSource::with_seed(1));
    let service = EngagementService::new(config, Arc::new(NoModelStore));
    let err = service
        .start_tracking(Box::new(source), "learner-1", "general")
        .err()
        .expect("start should fail");
    assert!(matches!(err, EngagementError::Config(_)));
    assert_eq!(opens.load(Ordering::SeqCst), 0);
}

#[test]
fn test_critical_events_reach_observers_after_calibration() {
    let mut config = fast_config();
    // Any attention below 1.0 fires.
    config.thresholds.low_attention = 1.0;
    let (session, rx) = start(config, synthetic(30, 20), "general");

    let mut critical = Vec::new();
    loop {
        match rx.recv_timeout(Duration::from_secs(10)) {
            Ok(SessionEvent::Critical(event, sample)) => critical.push((event, sample)),
            Ok(SessionEvent::Ended(_)) => break,
            Ok(_) => {}
            Err(e) => panic!("session did not end: {e}"),
        }
    }
    session.stop();

    assert!(!critical.is_empty());
    assert!(critical
        .iter()
        .all(|(_, sample)| sample.phase == SamplePhase::Active));
    assert_eq!(
        session.stats().counters.critical_events as usize,
        critical.len()
    );
    assert_eq!(session.critical_events().len(), critical.len());
    assert_eq!(session.report().critical_event_count as usize, critical.len());
}

#[test]
fn test_report_json_names_subject() {
    let (session, rx) = start(fast_config(), synthetic(12, 15), "general");
    wait_for_end(&rx);
    session.stop();

    let json: serde_json::Value = serde_json::from_str(&session.report_json()).unwrap();
    assert_eq!(json["subject_id"], "learner-1");
    assert_eq!(json["sample_count"], 5);
    session.dispose();
}

#[test]
fn test_overrunning_ticks_never_overlap() {
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let closed_while_busy = Arc::new(AtomicUsize::new(0));
    let (source, _opens, closes) = Tracked::new(SlowSource {
        inner: SyntheticFrameSource::with_seed(11),
        delay: Duration::from_millis(60),
        busy: busy.clone(),
        overlaps: overlaps.clone(),
        closed_while_busy: closed_while_busy.clone(),
    });
    let config = Config {
        tick_interval: Duration::from_millis(10),
        ..fast_config()
    };
    let (session, _rx) = start(config, source, "general");

    std::thread::sleep(Duration::from_millis(400));
    let stopping = Instant::now();
    session.stop();
    let stop_took = stopping.elapsed();

    // stop waits out the read in flight, which is at most one delay long.
    assert!(!busy.load(Ordering::SeqCst));
    assert!(stop_took < Duration::from_secs(2), "stop took {stop_took:?}");
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(closed_while_busy.load(Ordering::SeqCst), 0);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), SessionState::Stopped);

    let counters = session.stats().counters;
    assert!(counters.deferred_ticks > 0, "{counters:?}");
}

#[test]
fn test_open_distraction_is_closed_at_session_end() {
    let (session, rx) = start(fast_config(), BlankSource { next: 0, frames: 20 }, "general");
    let (updates, reason) = wait_for_end(&rx);
    assert!(matches!(reason, SessionEndReason::CaptureLost { .. }));
    assert_eq!(updates.len(), 20);
    assert!(updates.iter().all(|s| s.distraction_events.is_empty()));

    let event = session
        .final_distraction()
        .expect("open episode should be closed with the session");
    assert_eq!(event.kind, DistractionKind::FaceAbsent);
    assert_eq!(event.timestamp, start_time());
    assert_eq!(event.duration_ms, 1900);
    assert_eq!(event.recovery_ms, 0);
    assert_eq!(event.severity, Severity::Low);

    assert_eq!(session.stats().counters.distraction_events, 1);
    let report = session.report();
    assert_eq!(report.distraction_event_count, 1);
    assert_eq!(report.distraction_time_ms, 1900);
}
