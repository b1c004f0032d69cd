//! Configuration for the engagement monitor.

use crate::calibration::AdjustmentCoefficients;
use crate::core::distraction::DistractionConfig;
use crate::core::events::EventThresholds;
use crate::core::gaze_trail::GazeClassifierConfig;
use crate::model::ModelPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration for an engagement service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cadence of the analysis loop
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,

    /// Length of the personal calibration window, measured in frame time
    #[serde(with = "duration_secs")]
    pub calibration_duration: Duration,

    /// Maximum number of samples retained in session history
    pub history_capacity: usize,

    /// Maximum number of gaze points retained in the trail
    pub gaze_trail_capacity: usize,

    /// Number of recent feature vectors kept for module input windows
    pub feature_window: usize,

    /// Screen resolution the gaze coordinates map onto
    pub screen: ScreenSize,

    pub heatmap: HeatmapConfig,

    /// Fixation/saccade labelling of gaze points
    pub gaze: GazeClassifierConfig,

    pub thresholds: EventThresholds,

    pub adjustment: AdjustmentCoefficients,

    pub distraction: DistractionConfig,

    /// How inference modules pick between a model artifact and the built-in estimator
    pub model_policy: ModelPolicy,

    /// Consecutive frame read failures tolerated before the session is aborted
    pub max_capture_failures: u32,

    /// Optional JSON file with additional cultural profiles
    pub profiles_path: Option<PathBuf>,

    /// Path for exporting session reports
    pub export_path: PathBuf,

    /// Path for storing state
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("engagement-monitor");

        Self {
            tick_interval: Duration::from_millis(100),
            calibration_duration: Duration::from_secs(30),
            history_capacity: 1000,
            gaze_trail_capacity: 100,
            feature_window: 32,
            screen: ScreenSize::default(),
            heatmap: HeatmapConfig::default(),
            gaze: GazeClassifierConfig::default(),
            thresholds: EventThresholds::default(),
            adjustment: AdjustmentCoefficients::default(),
            distraction: DistractionConfig::default(),
            model_policy: ModelPolicy::default(),
            max_capture_failures: 5,
            profiles_path: None,
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("engagement-monitor")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tick_interval must be non-zero".into()));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be non-zero".into()));
        }
        if self.gaze_trail_capacity == 0 {
            return Err(ConfigError::Invalid(
                "gaze_trail_capacity must be non-zero".into(),
            ));
        }
        if self.feature_window < crate::inference::MAX_HISTORY_LEN {
            return Err(ConfigError::Invalid(format!(
                "feature_window must hold at least {} samples",
                crate::inference::MAX_HISTORY_LEN
            )));
        }
        if self.screen.width == 0 || self.screen.height == 0 {
            return Err(ConfigError::Invalid("screen dimensions must be non-zero".into()));
        }
        if self.heatmap.sigma_px <= 0.0 {
            return Err(ConfigError::Invalid("heatmap sigma must be positive".into()));
        }
        Ok(())
    }
}

/// Screen resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Gaussian kernel used when splatting gaze points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatmapConfig {
    pub radius_px: u32,
    pub sigma_px: f32,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            radius_px: 50,
            sigma_px: 20.0,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for durations stored as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for durations stored as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.calibration_duration, Duration::from_secs(30));
        assert_eq!(config.gaze_trail_capacity, 100);
        assert_eq!(config.heatmap.radius_px, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.tick_interval = Duration::from_millis(40);
        config.history_capacity = 12;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.tick_interval, Duration::from_millis(40));
        assert_eq!(loaded.history_capacity, 12);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded.history_capacity, Config::default().history_capacity);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "tick_interval": 250 }"#).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.tick_interval, Duration::from_millis(250));
        assert_eq!(loaded.gaze_trail_capacity, 100);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.tick_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.history_capacity = 0;
        assert!(config.validate().is_err());
    }
}
