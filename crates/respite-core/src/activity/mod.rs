//! User presence classification.
//!
//! ```text
//! idle < inactivity threshold          -> Active
//! idle < away threshold                -> Inactive
//! otherwise                            -> Away
//! screen asleep                        -> Away (forced)
//! not monitoring / not authorized      -> Unknown
//! ```

mod monitor;
mod probe;

pub use monitor::ActivityMonitor;
pub use probe::{IdleProbe, InputTracker};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::breaks::bounded_secs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Active,
    Inactive,
    Away,
    /// Monitoring is off or not permitted. Never conflated with `Away`.
    Unknown,
}

impl ActivityState {
    /// Whether a scheduled break should be held back for this state.
    pub fn blocks_breaks(self) -> bool {
        matches!(self, ActivityState::Inactive | ActivityState::Away)
    }
}

/// Screen power transitions observed by the platform layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenEvent {
    Sleep,
    Wake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityThresholds {
    pub inactivity_secs: i64,
    pub away_secs: i64,
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self {
            inactivity_secs: 120,
            away_secs: 300,
        }
    }
}

impl ActivityThresholds {
    pub fn new(inactivity_secs: i64, away_secs: i64) -> Self {
        Self {
            inactivity_secs,
            away_secs,
        }
    }

    /// Keep both thresholds within `[1 s, 7 days]` and `away >= inactivity`.
    pub fn sanitized(self) -> Self {
        let inactivity_secs = bounded_secs(self.inactivity_secs, 1);
        Self {
            inactivity_secs,
            away_secs: bounded_secs(self.away_secs, inactivity_secs),
        }
    }

    pub fn classify(&self, idle: Duration) -> ActivityState {
        let idle_ms = idle.num_milliseconds();
        if idle_ms < self.inactivity_secs.saturating_mul(1000) {
            ActivityState::Active
        } else if idle_ms < self.away_secs.saturating_mul(1000) {
            ActivityState::Inactive
        } else {
            ActivityState::Away
        }
    }
}

/// Latest published classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityReading {
    pub state: ActivityState,
    pub last_input_at: Option<DateTime<Utc>>,
    /// When `state` was entered.
    pub since: DateTime<Utc>,
    /// False when the probe lacks permission.
    pub monitorable: bool,
}

/// What the engine reads before starting a scheduled break.
pub trait ActivitySignal: Send + Sync {
    /// A fresh classification at `now`, not a cached one.
    fn current_state(&self, now: DateTime<Utc>) -> ActivityState;

    fn is_authorized(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_respects_thresholds() {
        let th = ActivityThresholds::new(60, 300);
        assert_eq!(th.classify(Duration::seconds(0)), ActivityState::Active);
        assert_eq!(th.classify(Duration::seconds(59)), ActivityState::Active);
        assert_eq!(th.classify(Duration::seconds(60)), ActivityState::Inactive);
        assert_eq!(th.classify(Duration::seconds(299)), ActivityState::Inactive);
        assert_eq!(th.classify(Duration::seconds(300)), ActivityState::Away);
    }

    #[test]
    fn sanitized_orders_thresholds() {
        let th = ActivityThresholds::new(-3, 0).sanitized();
        assert_eq!(th.inactivity_secs, 1);
        assert_eq!(th.away_secs, 1);

        let th = ActivityThresholds::new(600, 300).sanitized();
        assert_eq!(th.away_secs, 600);
    }

    #[test]
    fn oversized_thresholds_are_capped() {
        let week = crate::breaks::MAX_INTERVAL_SECS;
        let th = ActivityThresholds::new(i64::MAX, i64::MAX).sanitized();
        assert_eq!(th.inactivity_secs, week);
        assert_eq!(th.away_secs, week);

        // Raw, unsanitized thresholds still classify without overflowing.
        let raw = ActivityThresholds::new(i64::MAX - 1, i64::MAX);
        assert_eq!(raw.classify(Duration::days(30)), ActivityState::Active);
        let raw = ActivityThresholds::new(60, i64::MAX);
        assert_eq!(raw.classify(Duration::days(30)), ActivityState::Inactive);
    }

    #[test]
    fn only_inactive_and_away_block() {
        assert!(!ActivityState::Active.blocks_breaks());
        assert!(!ActivityState::Unknown.blocks_breaks());
        assert!(ActivityState::Inactive.blocks_breaks());
        assert!(ActivityState::Away.blocks_breaks());
    }
}
