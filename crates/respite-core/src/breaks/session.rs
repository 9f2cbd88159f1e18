//! One occurrence of a break and its lifecycle.
//!
//! ```text
//! Scheduled -> Active -> Completed
//! Scheduled -> Active <-> Paused
//! Scheduled | Active | Paused -> Skipped
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::BreakKind;
use crate::context::DelayReason;
use crate::error::{DatabaseError, TransitionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakStatus {
    Scheduled,
    Active,
    Paused,
    Completed,
    Skipped,
}

impl BreakStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BreakStatus::Completed | BreakStatus::Skipped)
    }

    /// Active or paused: the break currently occupies the user.
    pub fn is_live(self) -> bool {
        matches!(self, BreakStatus::Active | BreakStatus::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BreakStatus::Scheduled => "scheduled",
            BreakStatus::Active => "active",
            BreakStatus::Paused => "paused",
            BreakStatus::Completed => "completed",
            BreakStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for BreakStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(BreakStatus::Scheduled),
            "active" => Ok(BreakStatus::Active),
            "paused" => Ok(BreakStatus::Paused),
            "completed" => Ok(BreakStatus::Completed),
            "skipped" => Ok(BreakStatus::Skipped),
            other => Err(corrupt("status", other)),
        }
    }
}

/// What caused the break to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakTrigger {
    /// The kind's due-time timer fired.
    Scheduled,
    /// Started on request, bypassing the due time.
    Manual,
}

impl BreakTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakTrigger::Scheduled => "scheduled",
            BreakTrigger::Manual => "manual",
        }
    }
}

impl FromStr for BreakTrigger {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(BreakTrigger::Scheduled),
            "manual" => Ok(BreakTrigger::Manual),
            other => Err(corrupt("trigger", other)),
        }
    }
}

/// Why a break ended as `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Dismissed by the user.
    User,
    CalendarEvent,
    ExcludedApplication,
    FullscreenApplication,
    PresentationMode,
    DoNotDisturb,
    /// The scheduler was stopped while the break was in progress.
    SchedulerStopped,
    Other,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::User => "user",
            SkipReason::CalendarEvent => "calendar_event",
            SkipReason::ExcludedApplication => "excluded_application",
            SkipReason::FullscreenApplication => "fullscreen_application",
            SkipReason::PresentationMode => "presentation_mode",
            SkipReason::DoNotDisturb => "do_not_disturb",
            SkipReason::SchedulerStopped => "scheduler_stopped",
            SkipReason::Other => "other",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkipReason {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SkipReason::User),
            "calendar_event" => Ok(SkipReason::CalendarEvent),
            "excluded_application" => Ok(SkipReason::ExcludedApplication),
            "fullscreen_application" => Ok(SkipReason::FullscreenApplication),
            "presentation_mode" => Ok(SkipReason::PresentationMode),
            "do_not_disturb" => Ok(SkipReason::DoNotDisturb),
            "scheduler_stopped" => Ok(SkipReason::SchedulerStopped),
            "other" => Ok(SkipReason::Other),
            other => Err(corrupt("skip_reason", other)),
        }
    }
}

impl From<DelayReason> for SkipReason {
    fn from(reason: DelayReason) -> Self {
        match reason {
            DelayReason::CalendarEvent => SkipReason::CalendarEvent,
            DelayReason::ExcludedApplication => SkipReason::ExcludedApplication,
            DelayReason::FullscreenApplication => SkipReason::FullscreenApplication,
            DelayReason::PresentationMode => SkipReason::PresentationMode,
            DelayReason::DoNotDisturb => SkipReason::DoNotDisturb,
            DelayReason::Other => SkipReason::Other,
        }
    }
}

fn corrupt(column: &str, value: &str) -> DatabaseError {
    DatabaseError::CorruptRow {
        table: "breaks".into(),
        message: format!("unexpected {column} '{value}'"),
    }
}

/// A single break occurrence.
///
/// Handed to the outcome recorder once it reaches a terminal status, then
/// dropped from live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledBreak {
    pub id: String,
    pub kind: BreakKind,
    pub trigger: BreakTrigger,
    pub status: BreakStatus,
    pub scheduled_at: DateTime<Utc>,
    pub planned_duration_secs: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub skip_reason: Option<SkipReason>,
    /// Total time spent paused, in milliseconds.
    #[serde(default)]
    pub paused_ms: i64,
    #[serde(skip)]
    paused_since: Option<DateTime<Utc>>,
}

impl ScheduledBreak {
    pub fn new(
        kind: BreakKind,
        trigger: BreakTrigger,
        scheduled_at: DateTime<Utc>,
        planned_duration: Duration,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            trigger,
            status: BreakStatus::Scheduled,
            scheduled_at,
            planned_duration_secs: planned_duration.num_seconds(),
            started_at: None,
            ended_at: None,
            skip_reason: None,
            paused_ms: 0,
            paused_since: None,
        }
    }

    pub fn planned_duration(&self) -> Duration {
        Duration::seconds(self.planned_duration_secs)
    }

    /// Wall time actually spent on the break, excluding pauses.
    pub fn actual_duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let ended = self.ended_at?;
        Some((ended - started - Duration::milliseconds(self.paused_ms)).max(Duration::zero()))
    }

    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require(BreakStatus::Scheduled, "activate")?;
        self.status = BreakStatus::Active;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require(BreakStatus::Active, "pause")?;
        self.status = BreakStatus::Paused;
        self.paused_since = Some(now);
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require(BreakStatus::Paused, "resume")?;
        self.flush_pause(now);
        self.status = BreakStatus::Active;
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require(BreakStatus::Active, "complete")?;
        self.status = BreakStatus::Completed;
        self.ended_at = Some(now);
        Ok(())
    }

    /// Skip from any non-terminal status. A break that never started gets no end time.
    pub fn skip(&mut self, reason: SkipReason, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                from: self.status,
                action: "skip",
            });
        }
        self.flush_pause(now);
        if self.started_at.is_some() {
            self.ended_at = Some(now);
        }
        self.status = BreakStatus::Skipped;
        self.skip_reason = Some(reason);
        Ok(())
    }

    fn flush_pause(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.paused_since.take() {
            self.paused_ms += (now - since).num_milliseconds().max(0);
        }
    }

    fn require(&self, status: BreakStatus, action: &'static str) -> Result<(), TransitionError> {
        if self.status == status {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                action,
            })
        }
    }
}
