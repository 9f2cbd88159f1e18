use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SchedulerState;
use crate::breaks::{BreakKind, BreakStatus, BreakTrigger};

/// Read-only view of the scheduler for UI layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub state: SchedulerState,
    pub current: Option<CurrentBreak>,
    /// One entry per enabled kind. Empty while stopped.
    pub upcoming: Vec<UpcomingBreak>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentBreak {
    pub id: String,
    pub kind: BreakKind,
    pub trigger: BreakTrigger,
    pub status: BreakStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub planned_duration_secs: i64,
    pub remaining_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingBreak {
    pub kind: BreakKind,
    /// `None` while scheduling is paused or the kind is waiting on the current break.
    pub due_at: Option<DateTime<Utc>>,
    pub remaining_ms: Option<i64>,
}

impl EngineSnapshot {
    pub fn upcoming_for(&self, kind: BreakKind) -> Option<&UpcomingBreak> {
        self.upcoming.iter().find(|u| u.kind == kind)
    }

    /// Earliest known due-time across kinds.
    pub fn next_due(&self) -> Option<(BreakKind, DateTime<Utc>)> {
        self.upcoming
            .iter()
            .filter_map(|u| u.due_at.map(|at| (u.kind, at)))
            .min_by_key(|(_, at)| *at)
    }
}
