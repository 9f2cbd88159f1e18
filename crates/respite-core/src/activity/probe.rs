use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::error::ProbeError;

/// Source of input recency: how long since the last keyboard or mouse event.
///
/// Platform integrations (HID idle counters, X11 screensaver extension, ...)
/// implement this; the core ships [`InputTracker`] for in-process input.
pub trait IdleProbe: Send + Sync {
    /// Whether input monitoring permission has been granted.
    fn is_authorized(&self) -> bool;

    /// Time since the last observed input.
    fn idle_time(&self, now: DateTime<Utc>) -> Result<Duration, ProbeError>;
}

/// Probe fed explicitly with input timestamps.
#[derive(Debug)]
pub struct InputTracker {
    last_input: Mutex<DateTime<Utc>>,
    authorized: AtomicBool,
}

impl InputTracker {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_input: Mutex::new(now),
            authorized: AtomicBool::new(true),
        }
    }

    /// A tracker whose permission has not been granted yet.
    pub fn unauthorized(now: DateTime<Utc>) -> Self {
        let tracker = Self::new(now);
        tracker.set_authorized(false);
        tracker
    }

    pub fn record_input(&self, at: DateTime<Utc>) {
        let mut last = self.last_input.lock().unwrap_or_else(PoisonError::into_inner);
        if at > *last {
            *last = at;
        }
    }

    pub fn last_input(&self) -> DateTime<Utc> {
        *self.last_input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }
}

impl IdleProbe for InputTracker {
    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    fn idle_time(&self, now: DateTime<Utc>) -> Result<Duration, ProbeError> {
        if !self.is_authorized() {
            return Err(ProbeError::Unauthorized);
        }
        Ok((now - self.last_input()).max(Duration::zero()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn idle_time_measures_from_latest_input() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let tracker = InputTracker::new(t0);
        tracker.record_input(t0 + Duration::seconds(30));
        // Out-of-order input never moves the clock backwards.
        tracker.record_input(t0 + Duration::seconds(10));

        assert_eq!(
            tracker.idle_time(t0 + Duration::seconds(45)).unwrap(),
            Duration::seconds(15)
        );
    }

    #[test]
    fn unauthorized_tracker_refuses_to_answer() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let tracker = InputTracker::unauthorized(t0);
        assert!(!tracker.is_authorized());
        assert_eq!(tracker.idle_time(t0), Err(ProbeError::Unauthorized));

        tracker.set_authorized(true);
        assert!(tracker.idle_time(t0).is_ok());
    }
}
