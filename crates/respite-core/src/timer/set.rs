//! Named countdown multiplexer.
//!
//! Like the rest of the core, the set does not own a thread: the caller
//! feeds it the current wall-clock time and calls `poll()` to collect the
//! timers whose deadline has passed.
//!
//! ## Pause semantics
//!
//! ```text
//! Running { deadline } --pause_all(now)--> Frozen { remaining = deadline - now }
//! Frozen { remaining } --resume_all(now)-> Running { deadline = now + remaining }
//! ```
//!
//! A repeating timer re-arms from its previous deadline, never from the poll
//! time, so late polls and pause/resume cycles do not accumulate drift.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Countdown {
    Running { deadline: DateTime<Utc> },
    Frozen { remaining: Duration },
}

#[derive(Debug, Clone)]
struct TimerHandle<T> {
    interval: Duration,
    repeats: bool,
    countdown: Countdown,
    payload: T,
}

/// A timer that reached its deadline during `poll()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired<T> {
    pub id: String,
    pub payload: T,
    /// The deadline the timer was armed for (not the poll time).
    pub deadline: DateTime<Utc>,
}

/// A set of independently keyed countdowns with group pause/resume.
#[derive(Debug, Clone)]
pub struct TimerSet<T> {
    timers: HashMap<String, TimerHandle<T>>,
    paused: bool,
}

impl<T> Default for TimerSet<T> {
    fn default() -> Self {
        Self {
            timers: HashMap::new(),
            paused: false,
        }
    }
}

impl<T: Clone> TimerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Arm `id`, replacing any timer already registered under it.
    ///
    /// A non-positive interval is ignored. While the set is paused the new
    /// timer is created frozen with its full interval.
    pub fn start(
        &mut self,
        id: impl Into<String>,
        interval: Duration,
        repeats: bool,
        payload: T,
        now: DateTime<Utc>,
    ) {
        let id = id.into();
        if interval <= Duration::zero() {
            warn!(
                timer = %id,
                interval_ms = interval.num_milliseconds(),
                "ignoring timer with non-positive interval"
            );
            return;
        }
        let countdown = if self.paused {
            Countdown::Frozen {
                remaining: interval,
            }
        } else {
            Countdown::Running {
                deadline: now + interval,
            }
        };
        self.timers.insert(
            id,
            TimerHandle {
                interval,
                repeats,
                countdown,
                payload,
            },
        );
    }

    pub fn stop(&mut self, id: &str) {
        self.timers.remove(id);
    }

    pub fn stop_all(&mut self) {
        self.timers.clear();
    }

    /// Freeze every timer at its remaining time. Idempotent.
    pub fn pause_all(&mut self, now: DateTime<Utc>) {
        if self.paused {
            return;
        }
        for handle in self.timers.values_mut() {
            if let Countdown::Running { deadline } = handle.countdown {
                handle.countdown = Countdown::Frozen {
                    remaining: (deadline - now).max(Duration::zero()),
                };
            }
        }
        self.paused = true;
    }

    /// Re-arm every frozen timer with its frozen remaining time.
    pub fn resume_all(&mut self, now: DateTime<Utc>) {
        if !self.paused {
            return;
        }
        for handle in self.timers.values_mut() {
            if let Countdown::Frozen { remaining } = handle.countdown {
                handle.countdown = Countdown::Running {
                    deadline: now + remaining,
                };
            }
        }
        self.paused = false;
    }

    /// Collect every timer whose deadline is at or before `now`, earliest first.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Vec<Fired<T>> {
        if self.paused {
            return Vec::new();
        }

        let mut due: Vec<(DateTime<Utc>, String)> = self
            .timers
            .iter()
            .filter_map(|(id, handle)| match handle.countdown {
                Countdown::Running { deadline } if deadline <= now => Some((deadline, id.clone())),
                _ => None,
            })
            .collect();
        due.sort();

        let mut fired = Vec::with_capacity(due.len());
        for (deadline, id) in due {
            let Some(handle) = self.timers.get_mut(&id) else {
                continue;
            };
            fired.push(Fired {
                id: id.clone(),
                payload: handle.payload.clone(),
                deadline,
            });

            if handle.repeats {
                handle.countdown = Countdown::Running {
                    deadline: next_period(deadline, handle.interval, now),
                };
            } else {
                self.timers.remove(&id);
            }
        }
        fired
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Remaining time for `id`, whether running or frozen.
    pub fn remaining(&self, id: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.timers.get(id).map(|handle| match handle.countdown {
            Countdown::Running { deadline } => (deadline - now).max(Duration::zero()),
            Countdown::Frozen { remaining } => remaining,
        })
    }

    /// Scheduled deadline for `id`; `None` when unknown or frozen.
    pub fn deadline(&self, id: &str) -> Option<DateTime<Utc>> {
        match self.timers.get(id)?.countdown {
            Countdown::Running { deadline } => Some(deadline),
            Countdown::Frozen { .. } => None,
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.timers.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Earliest pending deadline; `None` while paused or empty.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        if self.paused {
            return None;
        }
        self.timers
            .values()
            .filter_map(|handle| match handle.countdown {
                Countdown::Running { deadline } => Some(deadline),
                Countdown::Frozen { .. } => None,
            })
            .min()
    }
}

/// First deadline after `now` on the grid `deadline + k * interval`.
/// Periods missed by a late poll are coalesced into one fire.
fn next_period(deadline: DateTime<Utc>, interval: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let next = deadline + interval;
    if next > now {
        return next;
    }
    let step_ms = interval.num_milliseconds().max(1);
    let behind_ms = (now - deadline).num_milliseconds();
    let periods = behind_ms / step_ms + 1;
    deadline + Duration::milliseconds(step_ms * periods)
}
