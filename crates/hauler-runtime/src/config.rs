//! Core configuration – reads/writes `~/.hauler/config.toml`.
//!
//! Every section is optional in the file; missing keys take the component
//! defaults. After parsing, `HAULER_*` environment variables are applied:
//!
//! | Variable | Field |
//! |---|---|
//! | `HAULER_MAX_SPEED` | `motion.max_speed` (mm/s) |
//! | `HAULER_MAX_ACCEL` | `motion.max_acceleration` (mm/s²) |
//! | `HAULER_MIN_SAFE_DISTANCE` | `safety.min_safe_distance_mm` |
//! | `HAULER_TICK_MS` | `motion.tick_ms` and `safety.tick_ms` |
//!
//! Unparseable or non-positive override values are ignored.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use hauler_kernel::{SafetyConfig, default_zones};
use hauler_motion::MotionConfig;
use hauler_perception::{EstimatorConfig, NormalizerConfig, TagPosition, TrackerConfig};
use hauler_types::{Pose, SafetyZone};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Surveyed start position (mm, rad).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StartPose {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub theta: f64,
}

impl StartPose {
    pub fn to_pose(self) -> Pose {
        Pose::at(self.x, self.y, self.theta)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub vehicle_id: String,
    /// Period of the sensor poll / fusion loop.
    pub perception_tick_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_pose: Option<StartPose>,
    pub normalizer: NormalizerConfig,
    pub tracker: TrackerConfig,
    pub estimator: EstimatorConfig,
    pub motion: MotionConfig,
    pub safety: SafetyConfig,
    pub zones: Vec<SafetyZone>,
    pub tags: Vec<TagPosition>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            vehicle_id: "hauler-01".to_string(),
            perception_tick_ms: 100,
            initial_pose: None,
            normalizer: NormalizerConfig::default(),
            tracker: TrackerConfig::default(),
            estimator: EstimatorConfig::default(),
            motion: MotionConfig::default(),
            safety: SafetyConfig::default(),
            zones: default_zones(),
            tags: Vec::new(),
        }
    }
}

impl CoreConfig {
    /// Load from `path`. Returns `Ok(None)` if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: CoreConfig = toml::from_str(&raw)?;
        cfg.apply_env_overrides();
        debug!(path = %path.display(), zones = cfg.zones.len(), "config loaded");
        Ok(Some(cfg))
    }

    /// Load from the default location, falling back to defaults (with
    /// environment overrides) when the file is absent.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::load_from(&config_path())? {
            Some(cfg) => Ok(cfg),
            None => {
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                Ok(cfg)
            }
        }
    }

    /// Write to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw).map_err(write_err)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let positive = |key: &str| -> Option<f64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() && v > 0.0 => Some(v),
                _ => {
                    warn!(key, value = %raw, "ignoring invalid override");
                    None
                }
            }
        };
        if let Some(v) = positive("HAULER_MAX_SPEED") {
            self.motion.max_speed = v;
        }
        if let Some(v) = positive("HAULER_MAX_ACCEL") {
            self.motion.max_acceleration = v;
        }
        if let Some(v) = positive("HAULER_MIN_SAFE_DISTANCE") {
            self.safety.min_safe_distance_mm = v;
        }
        if let Some(raw) = lookup("HAULER_TICK_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => {
                    self.motion.tick_ms = ms;
                    self.safety.tick_ms = ms;
                }
                _ => warn!(value = %raw, "ignoring invalid HAULER_TICK_MS"),
            }
        }
    }
}

/// `~/.hauler/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".hauler").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hauler_types::{Point2, ZoneKind};
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.motion.max_speed, 1000.0);
        assert_eq!(cfg.motion.max_acceleration, 500.0);
        assert_eq!(cfg.motion.max_jerk, 1000.0);
        assert_eq!(cfg.safety.min_safe_distance_mm, 300.0);
        assert_eq!(cfg.safety.alert_retention_hours, 24);
        assert_eq!(cfg.tracker.track_ttl_ms, 2000);
        assert_eq!(cfg.estimator.freshness_ms, 5000);
        assert_eq!(cfg.zones.len(), 2);
    }

    #[test]
    fn roundtrip_through_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = CoreConfig {
            initial_pose: Some(StartPose { x: 10.0, y: 20.0, theta: 0.5 }),
            ..CoreConfig::default()
        };
        cfg.tags.push(TagPosition {
            tag_id: "TAG_A".to_string(),
            x: 100.0,
            y: 200.0,
            theta: None,
        });
        cfg.zones.push(
            SafetyZone::new("dock_slow", ZoneKind::Slow, Point2::new(0.0, 0.0), 500.0)
                .with_max_speed(200.0),
        );
        cfg.save_to(&path).expect("save");

        let loaded = CoreConfig::load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.initial_pose, cfg.initial_pose);
        assert_eq!(loaded.tags, cfg.tags);
        assert_eq!(loaded.zones.len(), 3);
        assert_eq!(loaded.zones[2].max_speed, Some(200.0));
    }

    #[test]
    fn partial_file_takes_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "vehicle_id = \"h7\"\n\n[motion]\nmax_speed = 750.0\n").unwrap();

        let cfg = CoreConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.vehicle_id, "h7");
        assert_eq!(cfg.motion.max_speed, 750.0);
        assert_eq!(cfg.motion.max_acceleration, 500.0);
        assert_eq!(cfg.safety, SafetyConfig::default());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(CoreConfig::load_from(&path).unwrap().is_none());
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[motion\nmax_speed = ").unwrap();
        assert!(matches!(CoreConfig::load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn overrides_apply_valid_values() {
        let mut cfg = CoreConfig::default();
        cfg.apply_overrides(lookup(&[
            ("HAULER_MAX_SPEED", "800"),
            ("HAULER_MAX_ACCEL", "250.5"),
            ("HAULER_MIN_SAFE_DISTANCE", "450"),
            ("HAULER_TICK_MS", "50"),
        ]));
        assert_eq!(cfg.motion.max_speed, 800.0);
        assert_eq!(cfg.motion.max_acceleration, 250.5);
        assert_eq!(cfg.safety.min_safe_distance_mm, 450.0);
        assert_eq!(cfg.motion.tick_ms, 50);
        assert_eq!(cfg.safety.tick_ms, 50);
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let mut cfg = CoreConfig::default();
        cfg.apply_overrides(lookup(&[
            ("HAULER_MAX_SPEED", "fast"),
            ("HAULER_MAX_ACCEL", "-3"),
            ("HAULER_TICK_MS", "0"),
        ]));
        assert_eq!(cfg.motion, MotionConfig::default());
        assert_eq!(cfg.safety.tick_ms, 100);
    }

    #[test]
    fn env_override_is_read() {
        // SAFETY: single-threaded test; no other test reads this variable.
        unsafe { std::env::set_var("HAULER_MIN_SAFE_DISTANCE", "512") };
        let mut cfg = CoreConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.safety.min_safe_distance_mm, 512.0);
        unsafe { std::env::remove_var("HAULER_MIN_SAFE_DISTANCE") };
    }

    #[test]
    fn config_path_points_to_hauler_dir() {
        let p = config_path_for_home("/home/op");
        assert!(p.to_string_lossy().contains(".hauler"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }
}
