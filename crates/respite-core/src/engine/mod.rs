//! Break scheduling engine.
//!
//! Like the timer set underneath it, the engine is a wall-clock state
//! machine without threads: every command takes the current time and returns
//! the events it produced, and the caller invokes `tick()` when the next
//! deadline passes.
//!
//! ## Scheduler states
//!
//! ```text
//! Stopped --start--> Running <--pause/resume--> Paused
//!                       |  ^
//!     no kind enabled   v  |  a kind enabled
//!                     Disabled
//! any --stop--> Stopped
//! ```
//!
//! ## Due-time handling
//!
//! ```text
//! due(kind)
//!   not Running                -> ignore
//!   a break is current         -> retry after it ends
//!   user Inactive/Away         -> reschedule one cadence later, nothing recorded
//!   context says "not now"     -> record Skipped(reason), retry after the suggested delay
//!   otherwise                  -> start the break, arm its duration timer
//! ```
//!
//! Scheduling pause freezes only the due-time timers. A break in progress
//! keeps its own duration timer and is paused with `pause_current_break`.

mod snapshot;

pub use snapshot::{CurrentBreak, EngineSnapshot, UpcomingBreak};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activity::ActivitySignal;
use crate::breaks::{
    bounded_secs, BreakConfiguration, BreakKind, BreakSchedule, BreakTrigger, ScheduledBreak,
    SkipReason, MAX_INTERVAL_SECS,
};
use crate::context::{DelayAdvisor, DelayVerdict};
use crate::events::Event;
use crate::storage::{MissedBreakAnchor, OutcomeRecorder, SchedulingConfig};
use crate::timer::TimerSet;

const BREAK_TIMER_ID: &str = "break.duration";
/// Shortest delay used when re-arming a due-time timer.
const MIN_ARM_DELAY_SECS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
    Paused,
    /// Started, but no break kind is enabled.
    Disabled,
}

/// Policy knobs that are not part of the per-kind configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingPolicy {
    pub missed_break_anchor: MissedBreakAnchor,
    /// Gap left after the current break before a colliding kind retries.
    pub collision_grace: Duration,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self::from(&SchedulingConfig::default())
    }
}

impl From<&SchedulingConfig> for SchedulingPolicy {
    fn from(config: &SchedulingConfig) -> Self {
        Self {
            missed_break_anchor: config.missed_break_anchor,
            collision_grace: Duration::seconds(bounded_secs(config.collision_grace_secs, 0)),
        }
    }
}

/// The scheduler. Owns the configuration and the single live break.
pub struct BreakEngine {
    state: SchedulerState,
    schedule: BreakSchedule,
    policy: SchedulingPolicy,
    last_fired: HashMap<BreakKind, DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    due_timers: TimerSet<BreakKind>,
    break_timer: TimerSet<BreakKind>,
    current: Option<ScheduledBreak>,
    activity: Arc<dyn ActivitySignal>,
    advisor: Arc<dyn DelayAdvisor>,
    recorder: Arc<dyn OutcomeRecorder>,
}

impl BreakEngine {
    pub fn new(
        schedule: BreakSchedule,
        activity: Arc<dyn ActivitySignal>,
        advisor: Arc<dyn DelayAdvisor>,
        recorder: Arc<dyn OutcomeRecorder>,
    ) -> Self {
        Self {
            state: SchedulerState::Stopped,
            schedule: schedule.sanitized(),
            policy: SchedulingPolicy::default(),
            last_fired: HashMap::new(),
            started_at: None,
            due_timers: TimerSet::new(),
            break_timer: TimerSet::new(),
            current: None,
            activity,
            advisor,
            recorder,
        }
    }

    pub fn with_policy(mut self, policy: SchedulingPolicy) -> Self {
        self.policy = policy;
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn schedule(&self) -> &BreakSchedule {
        &self.schedule
    }

    /// The break that is Active or Paused, if any.
    pub fn current(&self) -> Option<&ScheduledBreak> {
        self.current.as_ref()
    }

    pub fn last_fired(&self, kind: BreakKind) -> Option<DateTime<Utc>> {
        self.last_fired.get(&kind).copied()
    }

    /// When `kind` is next due; `None` if not armed or frozen.
    pub fn due_at(&self, kind: BreakKind) -> Option<DateTime<Utc>> {
        self.due_timers.deadline(&kind.due_timer_id())
    }

    /// Time left on the current break.
    pub fn current_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.current.as_ref()?;
        self.break_timer.remaining(BREAK_TIMER_ID, now)
    }

    /// Earliest instant at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        match (self.due_timers.next_deadline(), self.break_timer.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> EngineSnapshot {
        let current = self.current.as_ref().map(|b| CurrentBreak {
            id: b.id.clone(),
            kind: b.kind,
            trigger: b.trigger,
            status: b.status,
            started_at: b.started_at,
            planned_duration_secs: b.planned_duration_secs,
            remaining_ms: self
                .break_timer
                .remaining(BREAK_TIMER_ID, now)
                .map(|d| d.num_milliseconds())
                .unwrap_or(0),
        });

        let upcoming = if self.state == SchedulerState::Stopped {
            Vec::new()
        } else {
            self.schedule
                .iter()
                .filter(|c| c.enabled)
                .map(|c| {
                    let id = c.kind.due_timer_id();
                    UpcomingBreak {
                        kind: c.kind,
                        due_at: self.due_timers.deadline(&id),
                        remaining_ms: self
                            .due_timers
                            .remaining(&id, now)
                            .map(|d| d.num_milliseconds()),
                    }
                })
                .collect()
        };

        EngineSnapshot {
            state: self.state,
            current,
            upcoming,
            at: now,
        }
    }

    // ── Scheduler commands ───────────────────────────────────────────

    /// Restore a kind's last-fired time, e.g. from history. Only moves forward.
    pub fn seed_last_fired(&mut self, kind: BreakKind, at: DateTime<Utc>) {
        let entry = self.last_fired.entry(kind).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }

    pub fn set_policy(&mut self, policy: SchedulingPolicy) {
        self.policy = policy;
    }

    /// Stopped -> Running (or Disabled). Arms every enabled kind from its
    /// last-fired time, or from now if it never fired.
    pub fn start(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        if self.state != SchedulerState::Stopped {
            debug!(state = ?self.state, "start ignored");
            return Vec::new();
        }

        self.started_at = Some(now);
        self.due_timers = TimerSet::new();
        self.state = self.running_state();
        info!(state = ?self.state, "scheduler started");

        let mut events = vec![Event::SchedulerStarted {
            state: self.state,
            at: now,
        }];
        for kind in BreakKind::ALL {
            let busy = self.current.as_ref().is_some_and(|b| b.kind == kind);
            if self.schedule.get(kind).enabled && !busy {
                self.arm_from_last_fired(kind, now, &mut events);
            }
        }
        events
    }

    /// Any state -> Stopped. Cancels every timer; a break in progress is
    /// recorded as skipped. Last-fired times survive, so a later `start`
    /// keeps each kind's cadence. Calling it again is a no-op.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        if self.state == SchedulerState::Stopped && self.current.is_none() {
            debug!("stop ignored: already stopped");
            return Vec::new();
        }

        let mut events = Vec::new();
        if let Some(mut current) = self.current.take() {
            match current.skip(SkipReason::SchedulerStopped, now) {
                Ok(()) => {
                    self.record(&current);
                    events.push(Event::BreakSkipped {
                        break_id: current.id.clone(),
                        kind: current.kind,
                        reason: SkipReason::SchedulerStopped,
                        at: now,
                    });
                }
                Err(e) => warn!(error = %e, "dropping current break on stop"),
            }
        }

        self.due_timers = TimerSet::new();
        self.break_timer = TimerSet::new();
        self.started_at = None;
        self.state = SchedulerState::Stopped;
        info!("scheduler stopped");
        events.push(Event::SchedulerStopped { at: now });
        events
    }

    /// Running -> Paused. Freezes every due-time countdown.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        if self.state != SchedulerState::Running {
            debug!(state = ?self.state, "pause ignored");
            return Vec::new();
        }
        self.due_timers.pause_all(now);
        self.state = SchedulerState::Paused;
        info!("scheduler paused");
        vec![Event::SchedulerPaused { at: now }]
    }

    /// Paused -> Running. Countdowns continue from where they were frozen.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        if self.state != SchedulerState::Paused {
            debug!(state = ?self.state, "resume ignored");
            return Vec::new();
        }
        self.due_timers.resume_all(now);
        self.state = self.running_state();
        info!(state = ?self.state, "scheduler resumed");
        vec![Event::SchedulerResumed {
            state: self.state,
            at: now,
        }]
    }

    /// Handle every timer whose deadline is at or before `now`.
    ///
    /// Break completion is processed before due-times, so a kind that comes
    /// due at the exact end of the current break is not treated as a collision.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();
        for fired in self.break_timer.poll(now) {
            self.complete_current(fired.payload, now, &mut events);
        }
        for fired in self.due_timers.poll(now) {
            self.handle_due(fired.payload, fired.deadline, now, &mut events);
        }
        events
    }

    /// Process a due-time fire for `kind`, originally due at `due_at`.
    pub fn on_due(
        &mut self,
        kind: BreakKind,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        self.handle_due(kind, due_at, now, &mut events);
        events
    }

    // ── Break commands ───────────────────────────────────────────────

    /// Start a break of `kind` right away. Rejected while a break is current.
    pub fn trigger_break(&mut self, kind: BreakKind, now: DateTime<Utc>) -> Vec<Event> {
        if let Some(current) = &self.current {
            debug!(
                requested = %kind,
                current = %current.kind,
                "trigger rejected: a break is already in progress"
            );
            return Vec::new();
        }
        // The pending due-time is superseded; the kind is rescheduled when this break ends.
        self.due_timers.stop(&kind.due_timer_id());

        let mut events = Vec::new();
        self.start_break(kind, BreakTrigger::Manual, now, now, &mut events);
        events
    }

    pub fn skip_current_break(&mut self, reason: SkipReason, now: DateTime<Utc>) -> Vec<Event> {
        let Some(mut current) = self.current.take() else {
            debug!("skip ignored: no break in progress");
            return Vec::new();
        };
        if let Err(e) = current.skip(reason, now) {
            debug!(error = %e, "skip ignored");
            self.current = Some(current);
            return Vec::new();
        }

        self.clear_break_timer(now);
        self.record(&current);
        self.last_fired.insert(current.kind, now);
        info!(kind = %current.kind, reason = %reason, "break skipped");

        let mut events = vec![Event::BreakSkipped {
            break_id: current.id.clone(),
            kind: current.kind,
            reason,
            at: now,
        }];
        self.reschedule(current.kind, now, &mut events);
        events
    }

    /// Freeze the current break's own countdown.
    pub fn pause_current_break(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let Some(current) = self.current.as_mut() else {
            debug!("pause ignored: no break in progress");
            return Vec::new();
        };
        if let Err(e) = current.pause(now) {
            debug!(error = %e, "break pause ignored");
            return Vec::new();
        }
        self.break_timer.pause_all(now);
        let remaining = self
            .break_timer
            .remaining(BREAK_TIMER_ID, now)
            .unwrap_or_else(Duration::zero);
        info!(
            kind = %current.kind,
            remaining_ms = remaining.num_milliseconds(),
            "break paused"
        );
        vec![Event::BreakPaused {
            break_id: current.id.clone(),
            kind: current.kind,
            remaining_ms: remaining.num_milliseconds(),
            at: now,
        }]
    }

    pub fn resume_current_break(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let Some(current) = self.current.as_mut() else {
            debug!("resume ignored: no break in progress");
            return Vec::new();
        };
        if let Err(e) = current.resume(now) {
            debug!(error = %e, "break resume ignored");
            return Vec::new();
        }
        self.break_timer.resume_all(now);
        let remaining = self
            .break_timer
            .remaining(BREAK_TIMER_ID, now)
            .unwrap_or_else(Duration::zero);
        info!(
            kind = %current.kind,
            remaining_ms = remaining.num_milliseconds(),
            "break resumed"
        );
        vec![Event::BreakResumed {
            break_id: current.id.clone(),
            kind: current.kind,
            remaining_ms: remaining.num_milliseconds(),
            at: now,
        }]
    }

    // ── Configuration ────────────────────────────────────────────────

    /// Replace one kind's configuration.
    pub fn update_configuration(
        &mut self,
        config: BreakConfiguration,
        now: DateTime<Utc>,
    ) -> Vec<Event> {
        let mut schedule = self.schedule;
        schedule.set(config);
        self.update_schedule(schedule, now)
    }

    /// Apply a new schedule. Only kinds whose configuration changed are
    /// re-armed, from their last-fired time; the current break is left alone.
    pub fn update_schedule(&mut self, schedule: BreakSchedule, now: DateTime<Utc>) -> Vec<Event> {
        let schedule = schedule.sanitized();
        let changed: Vec<BreakKind> = BreakKind::ALL
            .into_iter()
            .filter(|kind| self.schedule.get(*kind) != schedule.get(*kind))
            .collect();
        if changed.is_empty() {
            debug!("configuration unchanged");
            return Vec::new();
        }
        self.schedule = schedule;

        self.state = match self.state {
            SchedulerState::Running | SchedulerState::Disabled => self.running_state(),
            other => other,
        };
        info!(kinds = ?changed, state = ?self.state, "configuration changed");

        let mut events = vec![Event::ConfigurationChanged {
            kinds: changed.clone(),
            state: self.state,
            at: now,
        }];
        if self.state == SchedulerState::Stopped {
            return events;
        }

        for kind in changed {
            self.due_timers.stop(&kind.due_timer_id());
            let busy = self.current.as_ref().is_some_and(|b| b.kind == kind);
            if self.schedule.get(kind).enabled && !busy {
                self.arm_from_last_fired(kind, now, &mut events);
            }
        }
        events
    }

    // ── Internals ────────────────────────────────────────────────────

    fn running_state(&self) -> SchedulerState {
        if self.schedule.any_enabled() {
            SchedulerState::Running
        } else {
            SchedulerState::Disabled
        }
    }

    fn handle_due(
        &mut self,
        kind: BreakKind,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) {
        if self.state != SchedulerState::Running {
            debug!(kind = %kind, state = ?self.state, "due fire ignored");
            return;
        }
        let config = *self.schedule.get(kind);
        if !config.enabled {
            debug!(kind = %kind, "due fire ignored: kind disabled");
            return;
        }
        self.due_timers.stop(&kind.due_timer_id());

        if let Some(current) = &self.current {
            let remaining = self
                .break_timer
                .remaining(BREAK_TIMER_ID, now)
                .unwrap_or_else(Duration::zero);
            debug!(
                kind = %kind,
                current = %current.kind,
                "due fire collides with current break, retrying after it"
            );
            self.arm(kind, remaining + self.policy.collision_grace, now, events);
            return;
        }

        // Read fresh at decision time.
        let activity = self.activity.current_state(now);
        if activity.blocks_breaks() {
            self.last_fired.insert(kind, now);
            let next_due = match self.policy.missed_break_anchor {
                MissedBreakAnchor::Now => now + config.cadence(),
                MissedBreakAnchor::DueTime => next_on_grid(due_at, config.cadence(), now),
            };
            info!(
                kind = %kind,
                activity = ?activity,
                next_due = %next_due,
                "break missed, user not at the machine"
            );
            events.push(Event::BreakMissed {
                kind,
                activity,
                next_due,
                at: now,
            });
            self.arm(kind, next_due - now, now, events);
            return;
        }

        match self.advisor.evaluate(now) {
            DelayVerdict::Delay(request) => {
                let mut deferred =
                    ScheduledBreak::new(kind, BreakTrigger::Scheduled, due_at, config.duration());
                if let Err(e) = deferred.skip(request.reason.into(), now) {
                    warn!(error = %e, "could not mark deferred break as skipped");
                } else {
                    self.record(&deferred);
                }
                let delay = bounded_delay(request.suggested_delay);
                info!(
                    kind = %kind,
                    reason = ?request.reason,
                    detail = %request.detail,
                    delay_secs = delay.num_seconds(),
                    "break deferred"
                );
                events.push(Event::BreakDeferred {
                    break_id: deferred.id.clone(),
                    kind,
                    reason: request.reason,
                    detail: request.detail,
                    retry_at: now + delay,
                    at: now,
                });
                self.arm(kind, delay, now, events);
            }
            DelayVerdict::Allow => {
                self.start_break(kind, BreakTrigger::Scheduled, due_at, now, events);
            }
        }
    }

    fn start_break(
        &mut self,
        kind: BreakKind,
        trigger: BreakTrigger,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) {
        let duration = self.schedule.get(kind).duration();
        let mut next = ScheduledBreak::new(kind, trigger, scheduled_at, duration);
        if let Err(e) = next.activate(now) {
            warn!(error = %e, "could not activate break");
            return;
        }

        self.clear_break_timer(now);
        self.break_timer.start(BREAK_TIMER_ID, duration, false, kind, now);
        self.last_fired.insert(kind, now);
        info!(
            kind = %kind,
            trigger = ?trigger,
            duration_secs = duration.num_seconds(),
            "break started"
        );

        events.push(Event::BreakStarted {
            break_id: next.id.clone(),
            kind,
            trigger,
            duration_secs: duration.num_seconds(),
            at: now,
        });
        self.current = Some(next);
    }

    fn complete_current(&mut self, kind: BreakKind, now: DateTime<Utc>, events: &mut Vec<Event>) {
        let Some(mut current) = self.current.take() else {
            debug!(kind = %kind, "duration timer fired without a current break");
            return;
        };
        if let Err(e) = current.complete(now) {
            warn!(error = %e, "could not complete break");
            self.current = Some(current);
            return;
        }

        self.clear_break_timer(now);
        self.record(&current);
        self.last_fired.insert(current.kind, now);
        let actual_secs = current.actual_duration().map(|d| d.num_seconds()).unwrap_or(0);
        info!(kind = %current.kind, actual_secs, "break completed");

        events.push(Event::BreakCompleted {
            break_id: current.id.clone(),
            kind: current.kind,
            actual_secs,
            at: now,
        });
        self.reschedule(current.kind, now, events);
    }

    /// Arm `kind` again after its break ended, if scheduling is live.
    fn reschedule(&mut self, kind: BreakKind, now: DateTime<Utc>, events: &mut Vec<Event>) {
        let live = matches!(self.state, SchedulerState::Running | SchedulerState::Paused);
        if live && self.schedule.get(kind).enabled {
            self.arm_from_last_fired(kind, now, events);
        }
    }

    fn arm_from_last_fired(
        &mut self,
        kind: BreakKind,
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) {
        let anchor = self
            .last_fired
            .get(&kind)
            .copied()
            .or(self.started_at)
            .unwrap_or(now);
        let due = anchor + self.schedule.get(kind).cadence();
        self.arm(kind, due - now, now, events);
    }

    fn arm(
        &mut self,
        kind: BreakKind,
        delay: Duration,
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) {
        let delay = bounded_delay(delay);
        self.due_timers.start(kind.due_timer_id(), delay, false, kind, now);
        debug!(kind = %kind, delay_secs = delay.num_seconds(), "due timer armed");
        events.push(Event::BreakScheduled {
            kind,
            due_at: now + delay,
            at: now,
        });
    }

    /// Drop the duration timer and clear a leftover break-pause.
    fn clear_break_timer(&mut self, now: DateTime<Utc>) {
        self.break_timer.stop_all();
        self.break_timer.resume_all(now);
    }

    fn record(&self, outcome: &ScheduledBreak) {
        if let Err(e) = self.recorder.record(outcome) {
            warn!(
                break_id = %outcome.id,
                kind = %outcome.kind,
                error = %e,
                "failed to record break outcome"
            );
        }
    }
}

/// Every re-arm delay lands in `[1 s, 7 days]`, whatever a signal suggested.
fn bounded_delay(delay: Duration) -> Duration {
    delay.clamp(
        Duration::seconds(MIN_ARM_DELAY_SECS),
        Duration::seconds(MAX_INTERVAL_SECS),
    )
}

/// First instant after `now` on the grid `due_at + k * cadence`, k >= 1.
fn next_on_grid(due_at: DateTime<Utc>, cadence: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let next = due_at + cadence;
    if next > now {
        return next;
    }
    let step = cadence.num_milliseconds().max(1);
    let behind = (now - due_at).num_milliseconds();
    due_at + Duration::milliseconds(step * (behind / step + 1))
}
