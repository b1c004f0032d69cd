//! The analysis loop.
//!
//! A dedicated thread runs one tick per interval. Ticks never overlap: when
//! one overruns, the next starts as soon as it returns. Stopping sets a flag
//! and wakes the wait through a channel, then joins the thread, so `stop`
//! returns only after the in-flight tick has finished and the frame source
//! has been closed.

use super::observer::SessionEndReason;
use super::pipeline::{Pipeline, TickOutcome};
use super::stats::SessionState;
use super::SessionShared;
use crate::error::InitializationError;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Handle to a running analysis thread.
pub(crate) struct Scheduler {
    running: Arc<AtomicBool>,
    wake: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub(crate) fn spawn(pipeline: Pipeline, interval: Duration) -> Result<Self, InitializationError> {
        let running = Arc::new(AtomicBool::new(true));
        let (wake, wake_rx) = bounded::<()>(1);
        let r = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("engagement-analysis".into())
            .spawn(move || run(pipeline, interval, r, wake_rx))
            .map_err(|e| InitializationError::Scheduler(e.to_string()))?;

        Ok(Self {
            running,
            wake,
            thread: Some(thread),
        })
    }

    /// Stop the loop and wait for it to exit. Idempotent.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.wake.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Analysis thread exited by panic");
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Marks the session failed if the loop unwinds.
struct PanicGuard(Arc<SessionShared>);

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.finish(SessionState::Failed, SessionEndReason::Panicked);
        }
    }
}

fn run(
    mut pipeline: Pipeline,
    interval: Duration,
    running: Arc<AtomicBool>,
    wake: crossbeam_channel::Receiver<()>,
) {
    let shared = Arc::clone(pipeline.shared());
    let _guard = PanicGuard(Arc::clone(&shared));
    info!(subject = %shared.subject_id, ?interval, "Analysis loop started");

    let reason = loop {
        if !running.load(Ordering::SeqCst) {
            break SessionEndReason::Stopped;
        }

        let started = Instant::now();
        if let TickOutcome::CaptureLost(reason) = pipeline.tick() {
            warn!(%reason, "Capture lost, ending session");
            break SessionEndReason::CaptureLost { reason };
        }

        let elapsed = started.elapsed();
        if elapsed >= interval {
            shared.counters.record_deferred_tick();
            match wake.try_recv() {
                Err(TryRecvError::Empty) => continue,
                Ok(()) | Err(TryRecvError::Disconnected) => break SessionEndReason::Stopped,
            }
        }
        match wake.recv_timeout(interval - elapsed) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break SessionEndReason::Stopped,
        }
    };

    pipeline.close();
    let state = match reason {
        SessionEndReason::Stopped => SessionState::Stopped,
        _ => SessionState::Failed,
    };
    info!(?reason, "Analysis loop ended");
    shared.finish(state, reason);
}
