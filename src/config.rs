//! Configuration loading.
//!
//! Resolution order for the config file:
//! 1. `--config` argument
//! 2. `PHOTOTRIPS_CONFIG` environment variable
//! 3. `<config_dir>/phototrips/config.toml`
//! 4. Built-in defaults
//!
//! Command-line flags override individual values afterwards.

use crate::processor::{ClusteringParams, MergeParams, TripCriteria};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_ENV_VAR: &str = "PHOTOTRIPS_CONFIG";
const APP_DIR: &str = "phototrips";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceParams {
    /// Inferences below this confidence are not stored.
    pub min_confidence: f64,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library_dir: Option<PathBuf>,
    pub inference: InferenceParams,
    pub sessions: ClusteringParams,
    pub merge: MergeParams,
    pub trips: TripCriteria,
}

impl Config {
    /// Resolve and load the config file, falling back to defaults when none exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        match resolve_config_path(explicit, from_env, default_config_path()) {
            Some(path) => Self::from_file(&path),
            None => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Config = toml::from_str(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Library directory from the config file, else the platform data dir.
    pub fn library_dir(&self) -> PathBuf {
        self.library_dir.clone().unwrap_or_else(default_library_dir)
    }

    pub fn validate(&self) -> Result<()> {
        check_confidence("inference.min_confidence", self.inference.min_confidence)?;
        check_confidence("sessions.min_confidence", self.sessions.min_confidence)?;

        check_positive("sessions.max_time_gap_hours", self.sessions.max_time_gap_hours)?;
        check_positive("sessions.max_distance_km", self.sessions.max_distance_km)?;
        check_non_zero(
            "sessions.min_photos_per_session",
            self.sessions.min_photos_per_session,
        )?;

        check_non_negative("merge.max_time_gap_hours", self.merge.max_time_gap_hours)?;
        check_non_negative("merge.max_distance_km", self.merge.max_distance_km)?;

        let trips = &self.trips;
        check_non_negative("trips.min_distance_from_home_km", trips.min_distance_from_home_km)?;
        check_positive("trips.max_session_gap_hours", trips.max_session_gap_hours)?;
        check_non_negative("trips.min_duration_hours", trips.min_duration_hours)?;
        check_non_zero("trips.min_sessions", trips.min_sessions)?;
        check_non_negative("trips.max_home_stay_hours", trips.max_home_stay_hours)?;
        Ok(())
    }
}

/// Explicit and env paths are taken as given; the default location only
/// counts when the file exists.
fn resolve_config_path(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    default: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = from_env {
        return Some(path);
    }
    default.filter(|path| path.exists())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

fn default_library_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./phototrips_data"))
}

fn check_confidence(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be within [0, 1], got {value}")))
    }
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be positive, got {value}")))
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must not be negative, got {value}")))
    }
}

fn check_non_zero(name: &str, value: usize) -> Result<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be at least 1")))
    }
}
