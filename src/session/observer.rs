//! Subscribers to a tracking session.

use crate::core::events::CriticalEvent;
use crate::core::sample::EngagementSample;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionEndReason {
    Stopped,
    CaptureLost { reason: String },
    /// The analysis loop unwound
    Panicked,
}

/// Callbacks invoked on the scheduler thread.
///
/// Implementations must return quickly; a slow observer delays the next
/// tick. Use [`ChannelObserver`] to hand work off to another thread.
pub trait EngagementObserver: Send + Sync {
    fn on_engagement_update(&self, _sample: &Arc<EngagementSample>) {}

    fn on_critical_event(&self, _event: &CriticalEvent, _sample: &Arc<EngagementSample>) {}

    fn on_session_ended(&self, _reason: &SessionEndReason) {}

    /// Events this observer could not deliver.
    fn dropped_events(&self) -> u64 {
        0
    }
}

/// Events delivered through [`ChannelObserver`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Update(Arc<EngagementSample>),
    Critical(CriticalEvent, Arc<EngagementSample>),
    Ended(SessionEndReason),
}

/// Forwards session callbacks into a bounded channel.
///
/// Sends never block: when the channel is full the event is dropped and
/// counted.
pub struct ChannelObserver {
    tx: Sender<SessionEvent>,
    dropped: AtomicU64,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Self, Receiver<SessionEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    fn forward(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Receiver gone; nothing left to deliver to.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl EngagementObserver for ChannelObserver {
    fn on_engagement_update(&self, sample: &Arc<EngagementSample>) {
        self.forward(SessionEvent::Update(Arc::clone(sample)));
    }

    fn on_critical_event(&self, event: &CriticalEvent, sample: &Arc<EngagementSample>) {
        self.forward(SessionEvent::Critical(event.clone(), Arc::clone(sample)));
    }

    fn on_session_ended(&self, reason: &SessionEndReason) {
        self.forward(SessionEvent::Ended(reason.clone()));
    }

    fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
