use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityState;
use crate::breaks::{BreakKind, BreakTrigger, SkipReason};
use crate::context::DelayReason;
use crate::engine::SchedulerState;

/// Every state change in the scheduler produces an Event.
/// Commands return the events they caused; the service broadcasts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SchedulerStarted {
        state: SchedulerState,
        at: DateTime<Utc>,
    },
    SchedulerStopped {
        at: DateTime<Utc>,
    },
    SchedulerPaused {
        at: DateTime<Utc>,
    },
    SchedulerResumed {
        state: SchedulerState,
        at: DateTime<Utc>,
    },
    /// A kind's due-time timer was armed. Nominal while scheduling is paused.
    BreakScheduled {
        kind: BreakKind,
        due_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    BreakStarted {
        break_id: String,
        kind: BreakKind,
        trigger: BreakTrigger,
        duration_secs: i64,
        at: DateTime<Utc>,
    },
    BreakPaused {
        break_id: String,
        kind: BreakKind,
        remaining_ms: i64,
        at: DateTime<Utc>,
    },
    BreakResumed {
        break_id: String,
        kind: BreakKind,
        remaining_ms: i64,
        at: DateTime<Utc>,
    },
    BreakCompleted {
        break_id: String,
        kind: BreakKind,
        actual_secs: i64,
        at: DateTime<Utc>,
    },
    BreakSkipped {
        break_id: String,
        kind: BreakKind,
        reason: SkipReason,
        at: DateTime<Utc>,
    },
    /// The context held a due break back; a skipped outcome was recorded.
    BreakDeferred {
        break_id: String,
        kind: BreakKind,
        reason: DelayReason,
        detail: String,
        retry_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// The user was not at the machine when the break came due. Not recorded.
    BreakMissed {
        kind: BreakKind,
        activity: ActivityState,
        next_due: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    ConfigurationChanged {
        kinds: Vec<BreakKind>,
        state: SchedulerState,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Snake-case name of the variant, for compact output.
    pub fn name(&self) -> &'static str {
        match self {
            Event::SchedulerStarted { .. } => "scheduler_started",
            Event::SchedulerStopped { .. } => "scheduler_stopped",
            Event::SchedulerPaused { .. } => "scheduler_paused",
            Event::SchedulerResumed { .. } => "scheduler_resumed",
            Event::BreakScheduled { .. } => "break_scheduled",
            Event::BreakStarted { .. } => "break_started",
            Event::BreakPaused { .. } => "break_paused",
            Event::BreakResumed { .. } => "break_resumed",
            Event::BreakCompleted { .. } => "break_completed",
            Event::BreakSkipped { .. } => "break_skipped",
            Event::BreakDeferred { .. } => "break_deferred",
            Event::BreakMissed { .. } => "break_missed",
            Event::ConfigurationChanged { .. } => "configuration_changed",
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::SchedulerStarted { at, .. }
            | Event::SchedulerStopped { at }
            | Event::SchedulerPaused { at }
            | Event::SchedulerResumed { at, .. }
            | Event::BreakScheduled { at, .. }
            | Event::BreakStarted { at, .. }
            | Event::BreakPaused { at, .. }
            | Event::BreakResumed { at, .. }
            | Event::BreakCompleted { at, .. }
            | Event::BreakSkipped { at, .. }
            | Event::BreakDeferred { at, .. }
            | Event::BreakMissed { at, .. }
            | Event::ConfigurationChanged { at, .. } => *at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn serializes_with_type_tag() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let event = Event::BreakSkipped {
            break_id: "b1".into(),
            kind: BreakKind::Micro,
            reason: SkipReason::CalendarEvent,
            at,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BreakSkipped");
        assert_eq!(json["kind"], "micro");
        assert_eq!(json["reason"], "calendar_event");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.name(), "break_skipped");
        assert_eq!(back.at(), at);
    }
}
