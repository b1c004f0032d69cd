//! Integration tests for loading extra cultural profiles from a file.
//!
//! Runs in its own process so the file is the first source the table sees.

use chrono::{TimeZone, Utc};
use crossbeam_channel::Receiver;
use engagement_monitor::session::{ChannelObserver, EngagementObserver, SessionEvent};
use engagement_monitor::{
    Config, EngagementError, EngagementService, InitializationError, NoModelStore,
    SyntheticConfig, SyntheticFrameSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const EXTRA_PROFILES: &str = r#"{
    "Pacific-Islander": {
        "eye_contact_norm": 0.45,
        "expressiveness_baseline": 0.8,
        "emotional_suppression_tendency": 0.3,
        "posture_formality": 0.35,
        "distraction_tolerance": 0.6
    }
}"#;

fn config(profiles_path: Option<PathBuf>) -> Config {
    Config {
        tick_interval: Duration::from_millis(5),
        calibration_duration: Duration::ZERO,
        profiles_path,
        ..Config::default()
    }
}

fn source() -> SyntheticFrameSource {
    SyntheticFrameSource::new(SyntheticConfig {
        start: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        max_frames: Some(3),
        ..SyntheticConfig::default()
    })
}

fn wait_for_end(rx: &Receiver<SessionEvent>) {
    loop {
        match rx.recv_timeout(Duration::from_secs(10)) {
            Ok(SessionEvent::Ended(_)) => return,
            Ok(_) => {}
            Err(e) => panic!("session did not end: {e}"),
        }
    }
}

#[test]
fn test_profiles_file_is_used_and_pinned() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profiles.json");
    std::fs::write(&path, EXTRA_PROFILES).unwrap();

    let service = EngagementService::new(config(Some(path.clone())), Arc::new(NoModelStore));
    let (observer, rx) = ChannelObserver::new(64);
    let observer: Arc<dyn EngagementObserver> = Arc::new(observer);
    let session = service
        .start_tracking_with(Box::new(source()), "learner-1", "pacific_islander", vec![observer])
        .expect("session should start");
    wait_for_end(&rx);
    session.stop();

    let calibration = session.calibration().expect("calibration");
    assert_eq!(calibration.profile.tag, "pacific_islander");
    let current = session.current_sample().expect("current sample");
    assert_eq!(current.cultural_context.profile, "pacific_islander");

    // The same file again is fine.
    let again = EngagementService::new(config(Some(path)), Arc::new(NoModelStore));
    assert!(again
        .start_tracking(Box::new(source()), "learner-2", "pacific_islander")
        .is_ok());

    // A different file is not.
    let other_path = dir.path().join("other.json");
    std::fs::write(&other_path, EXTRA_PROFILES).unwrap();
    let other = EngagementService::new(config(Some(other_path)), Arc::new(NoModelStore));
    let err = other
        .start_tracking(Box::new(source()), "learner-3", "pacific_islander")
        .err()
        .expect("start should fail");
    assert!(matches!(
        err,
        EngagementError::Initialization(InitializationError::Profiles(_))
    ));
}
