//! Tracking sessions.
//!
//! [`EngagementService`] is the factory: it holds configuration and the
//! model store and starts one [`TrackingSession`] per learner. A session owns
//! a scheduler thread that pulls frames, runs the inference stack, calibrates
//! and publishes samples to its observers. The thread is the only writer of
//! session state; every accessor on the handle returns a snapshot.

pub mod observer;
pub(crate) mod pipeline;
pub(crate) mod scheduler;
pub mod stats;

pub use observer::{ChannelObserver, EngagementObserver, SessionEndReason, SessionEvent};
pub use stats::{CounterSnapshot, ServiceStats, SessionCounters, SessionState};

use crate::calibration::{profiles, Calibration, CalibrationState, Calibrator};
use crate::config::Config;
use crate::core::events::CriticalEvent;
use crate::core::heatmap::{self, AttentionHeatmap};
use crate::core::history::History;
use crate::core::report::{ReportBuilder, SessionReport};
use crate::core::sample::{DistractionEvent, EngagementSample};
use crate::error::EngagementError;
use crate::inference::{InferenceStack, ModuleStatus};
use crate::model::{Backend, ModelStore, TensorPool};
use crate::source::FrameSource;
use chrono::Utc;
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use pipeline::Pipeline;
use scheduler::Scheduler;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Capacity of channels handed out by [`TrackingSession::subscribe`].
pub const SUBSCRIBER_CAPACITY: usize = 256;

/// Mutable session state, written only by the scheduler thread.
struct SessionData {
    current: Option<Arc<EngagementSample>>,
    history: History,
    critical_events: VecDeque<CriticalEvent>,
    calibration_state: CalibrationState,
    calibration: Option<Arc<Calibration>>,
    /// Episode still open when the source closed
    final_distraction: Option<DistractionEvent>,
}

/// State shared between the handle and the scheduler thread.
pub(crate) struct SessionShared {
    pub(crate) subject_id: String,
    data: RwLock<SessionData>,
    pub(crate) counters: SessionCounters,
    observers: RwLock<Vec<Arc<dyn EngagementObserver>>>,
    state: RwLock<SessionState>,
    modules: Vec<ModuleStatus>,
}

impl SessionShared {
    fn new(
        subject_id: &str,
        history_capacity: usize,
        modules: Vec<ModuleStatus>,
        calibration_state: CalibrationState,
        observers: Vec<Arc<dyn EngagementObserver>>,
    ) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            data: RwLock::new(SessionData {
                current: None,
                history: History::new(history_capacity),
                critical_events: VecDeque::new(),
                calibration_state,
                calibration: None,
                final_distraction: None,
            }),
            counters: SessionCounters::new(),
            observers: RwLock::new(observers),
            state: RwLock::new(SessionState::Running),
            modules,
        }
    }

    /// Record the tick's sample. `record` is false during calibration, when
    /// the sample becomes current but stays out of history.
    pub(crate) fn commit(
        &self,
        sample: &Arc<EngagementSample>,
        critical: &[CriticalEvent],
        record: bool,
        calibration_state: CalibrationState,
        calibration: Option<Arc<Calibration>>,
    ) {
        let mut data = self.data.write();
        if record {
            data.history.push(Arc::clone(sample));
            let capacity = data.history.capacity();
            for event in critical {
                if data.critical_events.len() == capacity {
                    data.critical_events.pop_front();
                }
                data.critical_events.push_back(event.clone());
            }
        }
        data.current = Some(Arc::clone(sample));
        data.calibration_state = calibration_state;
        data.calibration = calibration;
    }

    pub(crate) fn record_final_distraction(&self, event: DistractionEvent) {
        self.data.write().final_distraction = Some(event);
    }

    fn observers(&self) -> Vec<Arc<dyn EngagementObserver>> {
        self.observers.read().clone()
    }

    pub(crate) fn publish(&self, sample: &Arc<EngagementSample>, critical: &[CriticalEvent]) {
        for observer in self.observers() {
            observer.on_engagement_update(sample);
            for event in critical {
                observer.on_critical_event(event, sample);
            }
        }
        self.counters.record_published();
    }

    /// Move out of `Running` and notify observers. Only the first call counts.
    pub(crate) fn finish(&self, state: SessionState, reason: SessionEndReason) {
        {
            let mut current = self.state.write();
            if *current != SessionState::Running {
                return;
            }
            *current = state;
        }
        for observer in self.observers() {
            observer.on_session_ended(&reason);
        }
    }
}

/// Starts tracking sessions against a shared configuration and model store.
pub struct EngagementService {
    config: Config,
    models: Arc<dyn ModelStore>,
    reports: ReportBuilder,
}

impl EngagementService {
    pub fn new(config: Config, models: Arc<dyn ModelStore>) -> Self {
        Self {
            config,
            models,
            reports: ReportBuilder::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Identifies this service instance in exported reports.
    pub fn instance_id(&self) -> Uuid {
        self.reports.instance_id()
    }

    /// Start tracking a learner.
    ///
    /// Loads the models and cultural profiles, opens `source`, begins
    /// calibration with `cultural_tag` and starts the analysis loop. An
    /// unknown tag falls back to the default profile.
    pub fn start_tracking(
        &self,
        source: Box<dyn FrameSource>,
        subject_id: &str,
        cultural_tag: &str,
    ) -> Result<TrackingSession, EngagementError> {
        self.start_tracking_with(source, subject_id, cultural_tag, Vec::new())
    }

    /// Like [`start_tracking`](Self::start_tracking), with observers attached
    /// before the first tick runs.
    pub fn start_tracking_with(
        &self,
        mut source: Box<dyn FrameSource>,
        subject_id: &str,
        cultural_tag: &str,
        observers: Vec<Arc<dyn EngagementObserver>>,
    ) -> Result<TrackingSession, EngagementError> {
        self.config.validate()?;
        let table = profiles::init_global(self.config.profiles_path.as_deref())?;
        let stack = InferenceStack::load(self.models.as_ref(), self.config.model_policy)?;

        let mut calibrator = Calibrator::new(self.config.calibration_duration);
        calibrator.begin(cultural_tag, table)?;

        source.open()?;
        let session_id = format!("SESS-{}", Utc::now().timestamp_millis());
        let modules = stack.modules();
        info!(
            session = %session_id,
            subject = subject_id,
            source = %source.describe(),
            models_loaded = stack.models_loaded(),
            "Tracking started"
        );

        let shared = Arc::new(SessionShared::new(
            subject_id,
            self.config.history_capacity,
            modules,
            calibrator.state(),
            observers,
        ));
        let pool = TensorPool::new();
        let pipeline = Pipeline::new(
            source,
            stack,
            pool.clone(),
            calibrator,
            self.config.clone(),
            Arc::clone(&shared),
        );
        let scheduler = Scheduler::spawn(pipeline, self.config.tick_interval)?;

        Ok(TrackingSession {
            reports: ReportBuilder::with_instance_id(self.instance_id())
                .with_session_id(session_id.clone()),
            id: session_id,
            shared,
            scheduler: Mutex::new(scheduler),
            pool,
            config: self.config.clone(),
        })
    }
}

/// Handle to a running (or finished) tracking session.
///
/// Dropping the handle stops the session.
pub struct TrackingSession {
    id: String,
    shared: Arc<SessionShared>,
    scheduler: Mutex<Scheduler>,
    pool: TensorPool,
    config: Config,
    reports: ReportBuilder,
}

impl TrackingSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject_id(&self) -> &str {
        &self.shared.subject_id
    }

    /// Stop the analysis loop, wait for the in-flight tick and close the
    /// frame source. Idempotent. Must not be called from an observer.
    pub fn stop(&self) {
        self.scheduler.lock().stop();
    }

    /// Stop and release the session.
    pub fn dispose(self) {
        self.stop();
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.lock().is_running()
    }

    /// The most recently published sample, calibration included.
    pub fn current_sample(&self) -> Option<Arc<EngagementSample>> {
        self.shared.data.read().current.clone()
    }

    /// Post-calibration samples, oldest first.
    pub fn history(&self) -> Vec<Arc<EngagementSample>> {
        self.shared.data.read().history.snapshot()
    }

    /// Retained critical events, oldest first.
    pub fn critical_events(&self) -> Vec<CriticalEvent> {
        self.shared.data.read().critical_events.iter().cloned().collect()
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.shared.data.read().calibration_state
    }

    /// Set once the calibration window has closed.
    pub fn calibration(&self) -> Option<Arc<Calibration>> {
        self.shared.data.read().calibration.clone()
    }

    /// The distraction episode that was still open when the session ended.
    /// It belongs to no sample, so [`history`](Self::history) never shows it.
    pub fn final_distraction(&self) -> Option<DistractionEvent> {
        self.shared.data.read().final_distraction.clone()
    }

    /// Gaze heatmap over the samples within `window` of the latest one.
    pub fn generate_attention_heatmap(&self, window: chrono::Duration) -> AttentionHeatmap {
        let samples = self.shared.data.read().history.within(window);
        heatmap::generate(&samples, self.config.screen, &self.config.heatmap)
    }

    pub fn stats(&self) -> ServiceStats {
        let observers = self.shared.observers();
        let mut counters = self.shared.counters.snapshot();
        counters.dropped_events = observers.iter().map(|o| o.dropped_events()).sum();

        let data = self.shared.data.read();
        ServiceStats {
            models_loaded: self
                .shared
                .modules
                .iter()
                .filter(|m| m.backend == Backend::Model)
                .count(),
            models: self.shared.modules.clone(),
            calibration_state: data.calibration_state,
            session_state: self.state(),
            history_size: data.history.len(),
            counters,
        }
    }

    /// Summary of the history so far.
    pub fn report(&self) -> SessionReport {
        let samples = self.history();
        let closing = self.final_distraction();
        self.reports.build(
            &self.shared.subject_id,
            &samples,
            closing.as_ref(),
            self.shared.counters.critical_event_count(),
        )
    }

    pub fn report_json(&self) -> String {
        let samples = self.history();
        let closing = self.final_distraction();
        self.reports.build_json(
            &self.shared.subject_id,
            &samples,
            closing.as_ref(),
            self.shared.counters.critical_event_count(),
        )
    }

    /// Register an observer for subsequent ticks.
    pub fn add_observer(&self, observer: Arc<dyn EngagementObserver>) {
        self.shared.observers.write().push(observer);
    }

    /// Receive session events on a bounded channel.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (observer, rx) = ChannelObserver::new(SUBSCRIBER_CAPACITY);
        self.add_observer(Arc::new(observer));
        rx
    }

    /// Tensor accounting for this session.
    pub fn tensor_pool(&self) -> &TensorPool {
        &self.pool
    }

    /// Human-readable counter summary.
    pub fn summary(&self) -> String {
        self.shared.counters.summary()
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.scheduler.get_mut().stop();
    }
}
