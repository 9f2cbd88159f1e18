use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Shortest cadence the engine will arm.
const MIN_CADENCE_SECS: i64 = 1;
/// Longest cadence, duration or delay accepted before clamping.
pub(crate) const MAX_INTERVAL_SECS: i64 = 7 * 24 * 60 * 60;

/// Clamp a configured number of seconds into `[min, MAX_INTERVAL_SECS]`.
pub(crate) fn bounded_secs(secs: i64, min: i64) -> i64 {
    secs.clamp(min, MAX_INTERVAL_SECS)
}

/// The closed set of break kinds. Each kind runs on its own timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakKind {
    Micro,
    Regular,
    Custom,
}

impl BreakKind {
    pub const ALL: [BreakKind; 3] = [BreakKind::Micro, BreakKind::Regular, BreakKind::Custom];

    pub fn as_str(self) -> &'static str {
        match self {
            BreakKind::Micro => "micro",
            BreakKind::Regular => "regular",
            BreakKind::Custom => "custom",
        }
    }

    /// Default time between two breaks of this kind, in seconds.
    pub fn default_cadence_secs(self) -> i64 {
        match self {
            BreakKind::Micro => 20 * 60,
            BreakKind::Regular => 60 * 60,
            BreakKind::Custom => 90 * 60,
        }
    }

    /// Default break length, in seconds.
    pub fn default_duration_secs(self) -> i64 {
        match self {
            BreakKind::Micro => 20,
            BreakKind::Regular => 5 * 60,
            BreakKind::Custom => 10 * 60,
        }
    }

    /// Timer id of this kind's due-time countdown.
    pub fn due_timer_id(self) -> String {
        format!("due.{}", self.as_str())
    }
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "micro" => Ok(BreakKind::Micro),
            "regular" => Ok(BreakKind::Regular),
            "custom" => Ok(BreakKind::Custom),
            other => Err(ConfigError::InvalidValue {
                key: "kind".into(),
                message: format!("unknown break kind '{other}'"),
            }),
        }
    }
}

/// Cadence and duration of one break kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakConfiguration {
    pub kind: BreakKind,
    pub cadence_secs: i64,
    pub duration_secs: i64,
    pub enabled: bool,
}

impl BreakConfiguration {
    pub fn new(kind: BreakKind, cadence_secs: i64, duration_secs: i64) -> Self {
        Self {
            kind,
            cadence_secs,
            duration_secs,
            enabled: true,
        }
    }

    pub fn default_for(kind: BreakKind) -> Self {
        Self {
            kind,
            cadence_secs: kind.default_cadence_secs(),
            duration_secs: kind.default_duration_secs(),
            // Custom breaks are opt-in.
            enabled: kind != BreakKind::Custom,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn cadence(&self) -> Duration {
        Duration::seconds(self.cadence_secs)
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_secs)
    }

    /// Replace non-positive or oversized values with safe ones.
    pub fn sanitized(self) -> Self {
        let mut out = self;
        if out.cadence_secs < MIN_CADENCE_SECS {
            warn!(
                kind = %out.kind,
                cadence_secs = out.cadence_secs,
                "non-positive cadence, using default"
            );
            out.cadence_secs = out.kind.default_cadence_secs();
        }
        if out.duration_secs <= 0 {
            warn!(
                kind = %out.kind,
                duration_secs = out.duration_secs,
                "non-positive duration, using default"
            );
            out.duration_secs = out.kind.default_duration_secs();
        }
        out.cadence_secs = out.cadence_secs.min(MAX_INTERVAL_SECS);
        out.duration_secs = out.duration_secs.min(MAX_INTERVAL_SECS);
        out
    }
}

/// The configuration of every break kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakSchedule {
    pub micro: BreakConfiguration,
    pub regular: BreakConfiguration,
    pub custom: BreakConfiguration,
}

impl Default for BreakSchedule {
    fn default() -> Self {
        Self {
            micro: BreakConfiguration::default_for(BreakKind::Micro),
            regular: BreakConfiguration::default_for(BreakKind::Regular),
            custom: BreakConfiguration::default_for(BreakKind::Custom),
        }
    }
}

impl BreakSchedule {
    pub fn get(&self, kind: BreakKind) -> &BreakConfiguration {
        match kind {
            BreakKind::Micro => &self.micro,
            BreakKind::Regular => &self.regular,
            BreakKind::Custom => &self.custom,
        }
    }

    /// Store `config` under its own kind.
    pub fn set(&mut self, config: BreakConfiguration) {
        match config.kind {
            BreakKind::Micro => self.micro = config,
            BreakKind::Regular => self.regular = config,
            BreakKind::Custom => self.custom = config,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BreakConfiguration> {
        [&self.micro, &self.regular, &self.custom].into_iter()
    }

    pub fn any_enabled(&self) -> bool {
        self.iter().any(|c| c.enabled)
    }

    /// Sanitize every kind and keep micro breaks more frequent than regular ones.
    pub fn sanitized(self) -> Self {
        let mut out = Self {
            micro: self.micro.sanitized(),
            regular: self.regular.sanitized(),
            custom: self.custom.sanitized(),
        };
        // Kinds must not be stored under the wrong slot.
        out.micro.kind = BreakKind::Micro;
        out.regular.kind = BreakKind::Regular;
        out.custom.kind = BreakKind::Custom;

        if out.micro.cadence_secs >= out.regular.cadence_secs {
            let clamped = (out.regular.cadence_secs / 2).max(MIN_CADENCE_SECS);
            warn!(
                micro_cadence_secs = out.micro.cadence_secs,
                regular_cadence_secs = out.regular.cadence_secs,
                clamped,
                "micro cadence not below regular cadence, clamping"
            );
            out.micro.cadence_secs = clamped;
        }
        out
    }
}
