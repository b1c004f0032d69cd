//! Demonstration of an engagement tracking session.
//!
//! This example shows how to:
//! 1. Start a session against a synthetic frame source
//! 2. Attach a custom observer before the first tick
//! 3. Follow calibration and critical events
//! 4. Read the session report and attention heatmap
//!
//! Run with: cargo run --example monitor_demo

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use engagement_monitor::{
    core::{CriticalEvent, EngagementSample, SamplePhase},
    session::{EngagementObserver, SessionEndReason},
    Config, EngagementService, NoModelStore, SyntheticConfig, SyntheticFrameSource,
};

/// Prints calibration progress and critical events.
#[derive(Default)]
struct ConsoleObserver {
    updates: AtomicU64,
}

impl EngagementObserver for ConsoleObserver {
    fn on_engagement_update(&self, sample: &Arc<EngagementSample>) {
        let n = self.updates.fetch_add(1, Ordering::Relaxed);
        if n % 10 == 0 {
            let phase = match sample.phase {
                SamplePhase::Calibrating => "calibrating",
                SamplePhase::Active => "active",
            };
            println!(
                "#{:<4} {:<11} engagement {:.2} attention {:.2} fatigue {:.2} emotion {}",
                sample.sequence,
                phase,
                sample.overall_engagement,
                sample.attention_level,
                sample.fatigue_level,
                sample.emotional_state.primary_emotion.as_str()
            );
        }
    }

    fn on_critical_event(&self, event: &CriticalEvent, sample: &Arc<EngagementSample>) {
        println!(
            "  critical at #{}: {:?} {:.2} ({})",
            sample.sequence, event.kind, event.value, event.suggestion
        );
    }

    fn on_session_ended(&self, reason: &SessionEndReason) {
        println!("Session ended: {reason:?}");
    }
}

fn main() {
    println!("Engagement Monitor - Session Demo");
    println!("=================================");
    println!();

    let config = Config {
        tick_interval: Duration::from_millis(20),
        calibration_duration: Duration::from_secs(2),
        ..Config::default()
    };

    // 300 frames at 100ms of frame time each: 30s of simulated lesson.
    let source = SyntheticFrameSource::new(SyntheticConfig {
        seed: 42,
        start: Utc::now(),
        max_frames: Some(300),
        ..SyntheticConfig::default()
    });

    let service = EngagementService::new(config, Arc::new(NoModelStore));
    let observer: Arc<dyn EngagementObserver> = Arc::new(ConsoleObserver::default());
    let session = match service.start_tracking_with(
        Box::new(source),
        "demo-learner",
        "east_asian",
        vec![observer],
    ) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Could not start session: {e}");
            return;
        }
    };

    // The synthetic source disconnects after its last frame.
    while session.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }
    session.stop();

    println!();
    if let Some(calibration) = session.calibration() {
        println!(
            "Calibration: profile {}, baseline from {} samples",
            calibration.profile.tag,
            calibration.baseline.as_ref().map_or(0, |b| b.sample_count)
        );
    }

    let report = session.report();
    println!("Samples in history: {}", report.sample_count);
    println!("Average engagement: {:.2}", report.averages.overall_engagement);
    println!("Average attention: {:.2}", report.averages.attention_level);
    println!("Distraction events: {}", report.distraction_event_count);
    println!("Critical events: {}", report.critical_event_count);

    let heatmap = session.generate_attention_heatmap(chrono::Duration::seconds(10));
    println!(
        "Heatmap: {} gaze points over the last 10s, peak density {:.4}",
        heatmap.point_count, heatmap.peak
    );

    println!();
    println!("{}", session.summary());
}
