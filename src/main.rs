//! Engagement Monitor CLI
//!
//! Runs a tracking session against the synthetic frame source and exports
//! the resulting report, history and attention heatmap.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use engagement_monitor::{
    calibration::profiles,
    config::Config,
    model::NoModelStore,
    session::{EngagementService, SessionEvent},
    source::{SyntheticConfig, SyntheticFrameSource},
    EngagementSample, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "engagement-monitor")]
#[command(version = VERSION)]
#[command(about = "Real-time learner engagement inference", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a synthetic learner and print live estimates
    Run {
        /// Subject identifier attached to every sample
        #[arg(long, default_value = "demo-learner")]
        subject: String,

        /// Cultural profile tag used for calibration
        #[arg(long, default_value = "general")]
        culture: String,

        /// Stop after this many seconds
        #[arg(long, default_value = "60")]
        seconds: u64,

        /// Seed for the synthetic frame source
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Heatmap window in milliseconds
        #[arg(long, default_value = "30000")]
        heatmap_ms: i64,

        /// Disable simulated look-away episodes
        #[arg(long)]
        steady: bool,

        /// Write report, history and heatmap JSON into this directory
        #[arg(long, short)]
        export: Option<PathBuf>,
    },

    /// List the cultural calibration profiles
    Profiles,

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("engagement_monitor=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("loading configuration")?;

    match cli.command {
        Commands::Run {
            subject,
            culture,
            seconds,
            seed,
            heatmap_ms,
            steady,
            export,
        } => cmd_run(
            config,
            &subject,
            &culture,
            Duration::from_secs(seconds),
            seed,
            chrono::Duration::milliseconds(heatmap_ms),
            steady,
            export,
        ),
        Commands::Profiles => cmd_profiles(&config),
        Commands::Config => cmd_config(&config, cli.config.as_deref()),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    config: Config,
    subject: &str,
    culture: &str,
    run_for: Duration,
    seed: u64,
    heatmap_window: chrono::Duration,
    steady: bool,
    export: Option<PathBuf>,
) -> Result<()> {
    println!("Engagement Monitor v{VERSION}");
    println!();

    let source = SyntheticFrameSource::new(SyntheticConfig {
        seed,
        frame_interval: config.tick_interval,
        start: Utc::now(),
        distractions: !steady,
        ..SyntheticConfig::default()
    });

    let service = EngagementService::new(config, Arc::new(NoModelStore));
    println!("Instance ID: {}", service.instance_id());
    println!(
        "Tick interval: {}ms, calibration: {}s",
        service.config().tick_interval.as_millis(),
        service.config().calibration_duration.as_secs()
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")?;

    let session = service
        .start_tracking(Box::new(source), subject, culture)
        .context("starting tracking session")?;
    let events = session.subscribe();
    let started = Instant::now();
    let mut last_print = Instant::now();

    while running.load(Ordering::SeqCst) && started.elapsed() < run_for {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(SessionEvent::Update(sample)) => {
                if last_print.elapsed() >= Duration::from_secs(1) {
                    print_sample(&sample);
                    last_print = Instant::now();
                }
            }
            Ok(SessionEvent::Critical(event, _)) => {
                println!(
                    "  ! {:?} ({:?}): {:.2} > {:.2}, {}",
                    event.kind, event.severity, event.value, event.threshold, event.suggestion
                );
            }
            Ok(SessionEvent::Ended(reason)) => {
                warn!(?reason, "Session ended");
                break;
            }
            Err(_) => {
                if !session.is_running() {
                    break;
                }
            }
        }
    }

    println!();
    println!("Stopping...");
    session.stop();

    println!();
    println!("{}", session.summary());
    let stats = session.stats();
    println!(
        "Models loaded: {}/{}, calibration: {:?}",
        stats.models_loaded,
        stats.models.len(),
        stats.calibration_state
    );

    if let Some(dir) = export {
        export_session(&session, &dir, heatmap_window)?;
        println!("Exported session to {}", dir.display());
    }

    session.dispose();
    Ok(())
}

fn print_sample(sample: &EngagementSample) {
    println!(
        "[{}] {:?} engagement {:.2} attention {:.2} load {:.2} fatigue {:.2} distraction {:.2} emotion {}",
        sample.timestamp.format("%H:%M:%S%.3f"),
        sample.phase,
        sample.overall_engagement,
        sample.attention_level,
        sample.cognitive_load,
        sample.fatigue_level,
        sample.distraction_probability,
        sample.emotional_state.primary_emotion.as_str(),
    );
}

fn export_session(
    session: &engagement_monitor::TrackingSession,
    dir: &Path,
    heatmap_window: chrono::Duration,
) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");

    let report_path = dir.join(format!("report_{stamp}.json"));
    std::fs::write(&report_path, session.report_json())
        .with_context(|| format!("writing {}", report_path.display()))?;

    let history = session.history();
    let samples: Vec<&EngagementSample> = history.iter().map(|s| s.as_ref()).collect();
    let history_path = dir.join(format!("history_{stamp}.json"));
    std::fs::write(&history_path, serde_json::to_string_pretty(&samples)?)
        .with_context(|| format!("writing {}", history_path.display()))?;

    let heatmap = session.generate_attention_heatmap(heatmap_window);
    let heatmap_path = dir.join(format!("heatmap_{stamp}.json"));
    std::fs::write(&heatmap_path, serde_json::to_string(&heatmap)?)
        .with_context(|| format!("writing {}", heatmap_path.display()))?;

    info!(
        samples = samples.len(),
        heatmap_points = heatmap.point_count,
        "Session exported"
    );
    Ok(())
}

fn cmd_profiles(config: &Config) -> Result<()> {
    let table = profiles::init_global(config.profiles_path.as_deref())
        .context("loading cultural profiles")?;

    println!("Cultural Profiles");
    println!("=================");
    println!();
    for tag in table.tags() {
        let p = table.lookup(tag);
        println!(
            "{:<16} eye contact {:.2}  expressiveness {:.2}  suppression {:.2}  formality {:.2}  tolerance {:.2}",
            p.tag,
            p.eye_contact_norm,
            p.expressiveness_baseline,
            p.emotional_suppression_tendency,
            p.posture_formality,
            p.distraction_tolerance,
        );
    }
    Ok(())
}

fn cmd_config(config: &Config, path: Option<&Path>) -> Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    match path {
        Some(path) => println!("Config file: {path:?}"),
        None => println!("Config file: {:?}", Config::config_path()),
    }
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
