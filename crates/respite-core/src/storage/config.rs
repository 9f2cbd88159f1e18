//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Cadence and duration of every break kind
//! - Activity thresholds and polling interval
//! - Smart delay signals, excluded and presentation applications
//! - Scheduling policy knobs
//!
//! Configuration is stored at `~/.config/respite/config.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::activity::ActivityThresholds;
use crate::breaks::{BreakConfiguration, BreakKind, BreakSchedule, MAX_INTERVAL_SECS};
use crate::error::ConfigError;

/// One break kind. Zero (or negative) values fall back to the kind default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakSettings {
    #[serde(default)]
    pub cadence_secs: i64,
    #[serde(default)]
    pub duration_secs: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl BreakSettings {
    fn default_for(kind: BreakKind) -> Self {
        let config = BreakConfiguration::default_for(kind);
        Self {
            cadence_secs: config.cadence_secs,
            duration_secs: config.duration_secs,
            enabled: config.enabled,
        }
    }

    fn to_configuration(&self, kind: BreakKind) -> BreakConfiguration {
        BreakConfiguration {
            kind,
            cadence_secs: self.cadence_secs,
            duration_secs: self.duration_secs,
            enabled: self.enabled,
        }
    }
}

/// Per-kind break configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreaksConfig {
    #[serde(default = "default_micro")]
    pub micro: BreakSettings,
    #[serde(default = "default_regular")]
    pub regular: BreakSettings,
    #[serde(default = "default_custom")]
    pub custom: BreakSettings,
}

/// Activity monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_inactivity_threshold")]
    pub inactivity_threshold_secs: i64,
    #[serde(default = "default_away_threshold")]
    pub away_threshold_secs: i64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

/// Smart delay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartDelayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub calendar: bool,
    #[serde(default = "default_true")]
    pub fullscreen: bool,
    #[serde(default = "default_true")]
    pub presentation: bool,
    #[serde(default = "default_true")]
    pub do_not_disturb: bool,
    /// Bundle ids or application names that hold breaks back.
    #[serde(default)]
    pub excluded_apps: Vec<String>,
    #[serde(default = "default_presentation_apps")]
    pub presentation_apps: Vec<String>,
    /// Re-check delay for excluded and fullscreen apps.
    #[serde(default = "default_short_recheck")]
    pub short_recheck_secs: i64,
    /// Re-check delay for presentations and do-not-disturb.
    #[serde(default = "default_medium_recheck")]
    pub medium_recheck_secs: i64,
    #[serde(default = "default_max_calendar_delay")]
    pub max_calendar_delay_secs: i64,
}

/// Where the next due-time of a break missed for inactivity is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedBreakAnchor {
    /// One full cadence after the moment the break was missed.
    Now,
    /// One full cadence after the original due-time.
    DueTime,
}

/// Scheduling policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default = "default_missed_break_anchor")]
    pub missed_break_anchor: MissedBreakAnchor,
    /// Gap between the end of a break and a colliding break of another kind.
    #[serde(default = "default_collision_grace")]
    pub collision_grace_secs: i64,
    /// Start scheduling as soon as `respite run` launches.
    #[serde(default = "default_true")]
    pub autostart: bool,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/respite/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub breaks: BreaksConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default)]
    pub smart_delay: SmartDelayConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
}

// Default functions
fn default_true() -> bool {
    true
}
fn default_micro() -> BreakSettings {
    BreakSettings::default_for(BreakKind::Micro)
}
fn default_regular() -> BreakSettings {
    BreakSettings::default_for(BreakKind::Regular)
}
fn default_custom() -> BreakSettings {
    BreakSettings::default_for(BreakKind::Custom)
}
fn default_inactivity_threshold() -> i64 {
    ActivityThresholds::default().inactivity_secs
}
fn default_away_threshold() -> i64 {
    ActivityThresholds::default().away_secs
}
fn default_poll_interval() -> u64 {
    5
}
fn default_presentation_apps() -> Vec<String> {
    vec![
        "com.apple.iWork.Keynote".into(),
        "com.microsoft.Powerpoint".into(),
        "us.zoom.xos".into(),
        "libreoffice-impress".into(),
    ]
}
fn default_short_recheck() -> i64 {
    5 * 60
}
fn default_medium_recheck() -> i64 {
    10 * 60
}
fn default_max_calendar_delay() -> i64 {
    2 * 60 * 60
}
fn default_missed_break_anchor() -> MissedBreakAnchor {
    MissedBreakAnchor::Now
}
fn default_collision_grace() -> i64 {
    30
}

impl Default for BreaksConfig {
    fn default() -> Self {
        Self {
            micro: default_micro(),
            regular: default_regular(),
            custom: default_custom(),
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inactivity_threshold_secs: default_inactivity_threshold(),
            away_threshold_secs: default_away_threshold(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for SmartDelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            calendar: true,
            fullscreen: true,
            presentation: true,
            do_not_disturb: true,
            excluded_apps: Vec::new(),
            presentation_apps: default_presentation_apps(),
            short_recheck_secs: default_short_recheck(),
            medium_recheck_secs: default_medium_recheck(),
            max_calendar_delay_secs: default_max_calendar_delay(),
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            missed_break_anchor: default_missed_break_anchor(),
            collision_grace_secs: default_collision_grace(),
            autostart: true,
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().map_or(true, |p| p.is_empty()) {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;
            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => {
                    let n: serde_json::Number = match value.parse::<i64>() {
                        Ok(n) => n.into(),
                        Err(_) => value
                            .parse::<u64>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as integer")))?
                            .into(),
                    };
                    serde_json::Value::Number(n)
                }
                serde_json::Value::Array(_) => {
                    // Accept either a JSON array or a comma-separated list.
                    match serde_json::from_str::<serde_json::Value>(value) {
                        Ok(arr @ serde_json::Value::Array(_)) => arr,
                        _ => serde_json::Value::Array(
                            value
                                .split(',')
                                .map(str::trim)
                                .filter(|s| !s.is_empty())
                                .map(|s| serde_json::Value::String(s.to_string()))
                                .collect(),
                        ),
                    }
                }
                serde_json::Value::Object(_) => {
                    serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                }
                _ => serde_json::Value::String(value.into()),
            };
            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    /// Default location of the configuration file.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if !path.exists() {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            return Ok(cfg);
        }
        Self::load_from(&path)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key. The caller persists it.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// The sanitized break schedule.
    pub fn break_schedule(&self) -> BreakSchedule {
        BreakSchedule {
            micro: self.breaks.micro.to_configuration(BreakKind::Micro),
            regular: self.breaks.regular.to_configuration(BreakKind::Regular),
            custom: self.breaks.custom.to_configuration(BreakKind::Custom),
        }
        .sanitized()
    }

    pub fn activity_thresholds(&self) -> ActivityThresholds {
        ActivityThresholds::new(
            self.activity.inactivity_threshold_secs,
            self.activity.away_threshold_secs,
        )
        .sanitized()
    }

    pub fn activity_poll_interval(&self) -> std::time::Duration {
        let secs = self
            .activity
            .poll_interval_secs
            .clamp(1, MAX_INTERVAL_SECS.unsigned_abs());
        std::time::Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.breaks.micro.cadence_secs, 20 * 60);
        assert_eq!(parsed.scheduling.missed_break_anchor, MissedBreakAnchor::Now);
        assert_eq!(parsed.smart_delay.presentation_apps.len(), 4);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [breaks.micro]
            cadence_secs = 600

            [scheduling]
            missed_break_anchor = "due_time"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.breaks.micro.cadence_secs, 600);
        assert_eq!(parsed.breaks.micro.duration_secs, 0);
        assert_eq!(parsed.breaks.regular.cadence_secs, 3600);
        assert_eq!(parsed.scheduling.missed_break_anchor, MissedBreakAnchor::DueTime);

        // Zero duration falls back to the kind default.
        let schedule = parsed.break_schedule();
        assert_eq!(schedule.micro.duration_secs, 20);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("breaks.micro.enabled").as_deref(), Some("true"));
        assert_eq!(cfg.get("breaks.regular.cadence_secs").as_deref(), Some("3600"));
        assert_eq!(
            cfg.get("scheduling.missed_break_anchor").as_deref(),
            Some("now")
        );
        assert!(cfg.get("breaks.missing_key").is_none());
        assert!(cfg.get("").is_none());
    }

    #[test]
    fn set_updates_nested_values() {
        let mut cfg = Config::default();
        cfg.set("breaks.custom.enabled", "true").unwrap();
        cfg.set("breaks.custom.cadence_secs", "5400").unwrap();
        cfg.set("scheduling.missed_break_anchor", "due_time").unwrap();
        cfg.set("smart_delay.excluded_apps", "com.a.One, com.b.Two").unwrap();

        assert!(cfg.breaks.custom.enabled);
        assert_eq!(cfg.breaks.custom.cadence_secs, 5400);
        assert_eq!(cfg.scheduling.missed_break_anchor, MissedBreakAnchor::DueTime);
        assert_eq!(cfg.smart_delay.excluded_apps, vec!["com.a.One", "com.b.Two"]);
    }

    #[test]
    fn set_rejects_unknown_key_and_bad_values() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("breaks.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            cfg.set("breaks.micro.enabled", "not_a_bool"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(cfg.set("scheduling.missed_break_anchor", "yesterday").is_err());
        // A failed set leaves the config untouched.
        assert_eq!(cfg.scheduling.missed_break_anchor, MissedBreakAnchor::Now);
    }

    #[test]
    fn save_and_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = Config::default();
        cfg.breaks.micro.cadence_secs = 900;
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.breaks.micro.cadence_secs, 900);

        let missing = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(missing.breaks.micro.cadence_secs, 1200);
    }

    #[test]
    fn load_from_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "breaks = 3").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::LoadFailed { .. })
        ));
    }

    #[test]
    fn activity_thresholds_are_sanitized() {
        let mut cfg = Config::default();
        cfg.activity.inactivity_threshold_secs = 600;
        cfg.activity.away_threshold_secs = 60;
        let th = cfg.activity_thresholds();
        assert_eq!(th.inactivity_secs, 600);
        assert_eq!(th.away_secs, 600);
    }
}
