//! Cultural calibration profiles.
//!
//! The table is process-wide and read-only once loaded. Lookups normalize the
//! tag and fall back to `general` on a miss.

use crate::error::InitializationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Tag of the profile used when a lookup misses.
pub const DEFAULT_PROFILE: &str = "general";

/// Per-culture norms used to de-bias inferred signals. All values in `[0,1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CulturalCalibrationProfile {
    /// Filled from the table key when loaded from a file
    #[serde(default)]
    pub tag: String,
    pub eye_contact_norm: f64,
    pub expressiveness_baseline: f64,
    pub emotional_suppression_tendency: f64,
    pub posture_formality: f64,
    pub distraction_tolerance: f64,
}

impl CulturalCalibrationProfile {
    fn new(tag: &str, norms: [f64; 5]) -> Self {
        Self {
            tag: tag.to_string(),
            eye_contact_norm: norms[0],
            expressiveness_baseline: norms[1],
            emotional_suppression_tendency: norms[2],
            posture_formality: norms[3],
            distraction_tolerance: norms[4],
        }
    }

    fn norms(&self) -> [(&'static str, f64); 5] {
        [
            ("eye_contact_norm", self.eye_contact_norm),
            ("expressiveness_baseline", self.expressiveness_baseline),
            (
                "emotional_suppression_tendency",
                self.emotional_suppression_tendency,
            ),
            ("posture_formality", self.posture_formality),
            ("distraction_tolerance", self.distraction_tolerance),
        ]
    }
}

/// Lowercase, with `-` and spaces mapped to `_`.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct CulturalProfileTable {
    profiles: HashMap<String, CulturalCalibrationProfile>,
}

impl CulturalProfileTable {
    /// The built-in profiles.
    pub fn builtin() -> Self {
        let profiles = [
            CulturalCalibrationProfile::new("general", [0.6, 0.7, 0.3, 0.5, 0.5]),
            CulturalCalibrationProfile::new("western", [0.7, 0.75, 0.25, 0.4, 0.5]),
            CulturalCalibrationProfile::new("east_asian", [0.4, 0.5, 0.6, 0.7, 0.6]),
            CulturalCalibrationProfile::new("south_asian", [0.5, 0.65, 0.45, 0.6, 0.55]),
            CulturalCalibrationProfile::new("middle_eastern", [0.55, 0.7, 0.4, 0.65, 0.5]),
            CulturalCalibrationProfile::new("latin_american", [0.65, 0.85, 0.2, 0.4, 0.55]),
            CulturalCalibrationProfile::new("african", [0.5, 0.75, 0.35, 0.55, 0.55]),
            CulturalCalibrationProfile::new("nordic", [0.65, 0.5, 0.5, 0.45, 0.45]),
        ];
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.tag.clone(), p))
                .collect(),
        }
    }

    /// Built-in profiles overlaid with the entries of a JSON object keyed by tag.
    pub fn from_json_str(json: &str) -> Result<Self, InitializationError> {
        let extra: HashMap<String, CulturalCalibrationProfile> =
            serde_json::from_str(json).map_err(|e| InitializationError::Profiles(e.to_string()))?;

        let mut table = Self::builtin();
        for (tag, mut profile) in extra {
            let tag = normalize_tag(&tag);
            if tag.is_empty() {
                return Err(InitializationError::Profiles("empty profile tag".into()));
            }
            for (name, value) in profile.norms() {
                if !(0.0..=1.0).contains(&value) {
                    return Err(InitializationError::Profiles(format!(
                        "profile `{tag}`: {name} = {value} is outside [0,1]"
                    )));
                }
            }
            profile.tag = tag.clone();
            table.profiles.insert(tag, profile);
        }
        Ok(table)
    }

    pub fn load_json(path: &Path) -> Result<Self, InitializationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            InitializationError::Profiles(format!("{}: {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    /// Resolve a tag. The flag is `false` when the default profile was substituted.
    pub fn resolve(&self, tag: &str) -> (&CulturalCalibrationProfile, bool) {
        match self.profiles.get(&normalize_tag(tag)) {
            Some(profile) => (profile, true),
            None => (self.default_profile(), false),
        }
    }

    pub fn lookup(&self, tag: &str) -> &CulturalCalibrationProfile {
        self.resolve(tag).0
    }

    fn default_profile(&self) -> &CulturalCalibrationProfile {
        static FALLBACK: OnceLock<CulturalCalibrationProfile> = OnceLock::new();
        self.profiles
            .get(DEFAULT_PROFILE)
            .unwrap_or_else(|| {
                FALLBACK.get_or_init(|| {
                    CulturalCalibrationProfile::new(DEFAULT_PROFILE, [0.6, 0.7, 0.3, 0.5, 0.5])
                })
            })
    }

    /// Known tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// The process-wide table and the file it was loaded from.
struct LoadedProfiles {
    table: CulturalProfileTable,
    source: Option<PathBuf>,
}

static PROFILES: OnceLock<LoadedProfiles> = OnceLock::new();

/// The process-wide table, initialized with the built-ins on first use.
pub fn global() -> &'static CulturalProfileTable {
    &PROFILES
        .get_or_init(|| LoadedProfiles {
            table: CulturalProfileTable::builtin(),
            source: None,
        })
        .table
}

/// Initialize the process-wide table from a file on first call.
///
/// Later calls return the already-loaded table; the file is not re-read.
/// Asking for a different file once a table is loaded is an error.
pub fn init_global(path: Option<&Path>) -> Result<&'static CulturalProfileTable, InitializationError> {
    let loaded = match PROFILES.get() {
        Some(loaded) => loaded,
        None => {
            let table = match path {
                Some(path) => {
                    let table = CulturalProfileTable::load_json(path)?;
                    info!(
                        "Loaded {} cultural profiles from {}",
                        table.len(),
                        path.display()
                    );
                    table
                }
                None => CulturalProfileTable::builtin(),
            };
            PROFILES.get_or_init(|| LoadedProfiles {
                table,
                source: path.map(Path::to_path_buf),
            })
        }
    };

    match (path, loaded.source.as_deref()) {
        (None, _) => Ok(&loaded.table),
        (Some(requested), Some(source)) if requested == source => {
            debug!("Cultural profile table already loaded from {}", source.display());
            Ok(&loaded.table)
        }
        (Some(requested), source) => Err(InitializationError::Profiles(format!(
            "cultural profiles already loaded from {}, cannot load {}",
            source.map_or_else(|| "built-ins".to_string(), |p| p.display().to_string()),
            requested.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tags() {
        let table = CulturalProfileTable::builtin();
        assert_eq!(table.len(), 8);
        assert!(table.tags().contains(&"east_asian"));
    }

    #[test]
    fn test_lookup_normalizes_and_falls_back() {
        let table = CulturalProfileTable::builtin();
        let (profile, matched) = table.resolve("East-Asian");
        assert!(matched);
        assert_eq!(profile.tag, "east_asian");

        let (profile, matched) = table.resolve("Latin American");
        assert!(matched);
        assert_eq!(profile.tag, "latin_american");

        let (profile, matched) = table.resolve("martian");
        assert!(!matched);
        assert_eq!(profile.tag, DEFAULT_PROFILE);
    }

    #[test]
    fn test_json_overlay() {
        let json = r#"{
            "Pacific-Islander": {
                "eye_contact_norm": 0.45,
                "expressiveness_baseline": 0.8,
                "emotional_suppression_tendency": 0.3,
                "posture_formality": 0.35,
                "distraction_tolerance": 0.6
            }
        }"#;
        let table = CulturalProfileTable::from_json_str(json).unwrap();
        assert_eq!(table.len(), 9);
        assert_eq!(table.lookup("pacific islander").eye_contact_norm, 0.45);
        assert_eq!(table.lookup("pacific_islander").tag, "pacific_islander");
    }

    #[test]
    fn test_json_rejects_bad_input() {
        assert!(matches!(
            CulturalProfileTable::from_json_str("not json"),
            Err(InitializationError::Profiles(_))
        ));

        let out_of_range = r#"{ "x": {
            "eye_contact_norm": 1.5,
            "expressiveness_baseline": 0.5,
            "emotional_suppression_tendency": 0.5,
            "posture_formality": 0.5,
            "distraction_tolerance": 0.5
        } }"#;
        assert!(CulturalProfileTable::from_json_str(out_of_range).is_err());
    }

    #[test]
    fn test_load_json_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = CulturalProfileTable::load_json(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(InitializationError::Profiles(_))));
    }

    #[test]
    fn test_second_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.json");
        std::fs::write(&path, "{}").unwrap();

        global();
        let err = init_global(Some(&path)).unwrap_err();
        match err {
            InitializationError::Profiles(reason) => {
                assert!(reason.contains("already loaded from built-ins"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(init_global(None).is_ok());
    }

    #[test]
    fn test_global_is_stable() {
        let a = global() as *const CulturalProfileTable;
        let b = init_global(None).unwrap() as *const CulturalProfileTable;
        assert_eq!(a, b);
    }
}
