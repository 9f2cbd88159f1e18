use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ActivityReading, ActivitySignal, ActivityState, ActivityThresholds, IdleProbe, ScreenEvent,
};
use crate::breaks::MAX_INTERVAL_SECS;
use crate::clock::{Clock, SystemClock};
use crate::error::ProbeError;

#[derive(Debug)]
struct MonitorState {
    thresholds: ActivityThresholds,
    monitoring: bool,
    screen_asleep: bool,
    woke_at: Option<DateTime<Utc>>,
    last_input_at: Option<DateTime<Utc>>,
}

struct Shared {
    probe: Arc<dyn IdleProbe>,
    clock: Arc<dyn Clock>,
    state: Mutex<MonitorState>,
    tx: watch::Sender<ActivityReading>,
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Polls an [`IdleProbe`] and publishes presence transitions.
///
/// Subscribers are notified once per transition, never once per poll.
pub struct ActivityMonitor {
    shared: Arc<Shared>,
    poll_interval: std::time::Duration,
    worker: Mutex<Option<Worker>>,
}

impl ActivityMonitor {
    pub fn new(
        probe: Arc<dyn IdleProbe>,
        thresholds: ActivityThresholds,
        poll_interval: std::time::Duration,
    ) -> Self {
        Self::with_clock(probe, thresholds, poll_interval, Arc::new(SystemClock))
    }

    /// Like [`ActivityMonitor::new`], but the worker and the stop/start
    /// transitions read time from `clock`.
    pub fn with_clock(
        probe: Arc<dyn IdleProbe>,
        thresholds: ActivityThresholds,
        poll_interval: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let poll_interval = poll_interval.clamp(
            std::time::Duration::from_millis(1),
            std::time::Duration::from_secs(MAX_INTERVAL_SECS.unsigned_abs()),
        );
        let monitorable = probe.is_authorized();
        let (tx, _rx) = watch::channel(ActivityReading {
            state: ActivityState::Unknown,
            last_input_at: None,
            since: clock.now(),
            monitorable,
        });
        Self {
            shared: Arc::new(Shared {
                probe,
                clock,
                state: Mutex::new(MonitorState {
                    thresholds: thresholds.sanitized(),
                    monitoring: false,
                    screen_asleep: false,
                    woke_at: None,
                    last_input_at: None,
                }),
                tx,
            }),
            poll_interval,
            worker: Mutex::new(None),
        }
    }

    /// Start periodic polling. Must be called from within a Tokio runtime.
    ///
    /// Returns `false` and stays dormant when the probe is not authorized.
    pub fn start_monitoring(&self) -> bool {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return true;
        }

        let now = self.shared.clock.now();
        if !self.shared.probe.is_authorized() {
            warn!("input monitoring not authorized, activity monitor stays dormant");
            self.shared.publish(ActivityState::Unknown, false, None, now);
            return false;
        }

        lock(&self.shared.state).monitoring = true;
        self.shared.poll(now);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor_loop(
            self.shared.clone(),
            self.poll_interval,
            cancel.clone(),
        ));
        *worker = Some(Worker { handle, cancel });
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "activity monitoring started"
        );
        true
    }

    /// Stop polling; the reading falls back to `Unknown`.
    pub async fn stop_monitoring(&self) {
        let worker = lock(&self.worker).take();
        let Some(worker) = worker else {
            return;
        };
        worker.cancel.cancel();
        if let Err(err) = worker.handle.await {
            warn!(%err, "activity monitor task failed to join");
        }

        let monitorable = self.shared.probe.is_authorized();
        {
            let mut st = lock(&self.shared.state);
            st.monitoring = false;
            st.screen_asleep = false;
            st.woke_at = None;
        }
        let now = self.shared.clock.now();
        self.shared.publish(ActivityState::Unknown, monitorable, None, now);
        info!("activity monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.shared.state).monitoring
    }

    /// Sample the probe now and publish the result if it changed.
    pub fn poll(&self, now: DateTime<Utc>) -> ActivityState {
        self.shared.poll(now)
    }

    /// Screen sleep forces `Away`; wake forces `Active`.
    pub fn on_screen_event(&self, event: ScreenEvent, now: DateTime<Utc>) {
        let last_input = {
            let mut st = lock(&self.shared.state);
            if !st.monitoring {
                debug!(?event, "screen event ignored, not monitoring");
                return;
            }
            match event {
                ScreenEvent::Sleep => {
                    st.screen_asleep = true;
                }
                ScreenEvent::Wake => {
                    st.screen_asleep = false;
                    st.woke_at = Some(now);
                    st.last_input_at = Some(now);
                }
            }
            st.last_input_at
        };

        let state = match event {
            ScreenEvent::Sleep => ActivityState::Away,
            ScreenEvent::Wake => ActivityState::Active,
        };
        self.shared.publish(state, true, last_input, now);
    }

    /// Replace the thresholds and reclassify from the last known input.
    pub fn set_thresholds(&self, thresholds: ActivityThresholds, now: DateTime<Utc>) {
        let reclassified = {
            let mut st = lock(&self.shared.state);
            st.thresholds = thresholds.sanitized();
            match (st.monitoring, st.screen_asleep, st.last_input_at) {
                (true, false, Some(last)) => Some((st.thresholds.classify(now - last), last)),
                _ => None,
            }
        };
        if let Some((state, last)) = reclassified {
            self.shared.publish(state, true, Some(last), now);
        }
    }

    pub fn thresholds(&self) -> ActivityThresholds {
        lock(&self.shared.state).thresholds
    }

    pub fn reading(&self) -> ActivityReading {
        self.shared.tx.borrow().clone()
    }

    /// Receiver that changes once per state transition.
    pub fn subscribe(&self) -> watch::Receiver<ActivityReading> {
        self.shared.tx.subscribe()
    }
}

impl ActivitySignal for ActivityMonitor {
    fn current_state(&self, now: DateTime<Utc>) -> ActivityState {
        self.shared.poll(now)
    }

    fn is_authorized(&self) -> bool {
        self.shared.probe.is_authorized()
    }
}

impl Shared {
    fn poll(&self, now: DateTime<Utc>) -> ActivityState {
        let (state, monitorable, last_input) = {
            let mut st = lock(&self.state);
            if !st.monitoring {
                return ActivityState::Unknown;
            }
            if st.screen_asleep {
                (ActivityState::Away, true, st.last_input_at)
            } else {
                match self.probe.idle_time(now) {
                    Ok(idle) => {
                        // The probe may not count a wake-up as input.
                        let idle = match st.woke_at {
                            Some(woke) => idle.min((now - woke).max(Duration::zero())),
                            None => idle,
                        };
                        st.last_input_at = Some(now - idle);
                        (st.thresholds.classify(idle), true, st.last_input_at)
                    }
                    Err(ProbeError::Unauthorized) => {
                        warn!("input monitoring permission revoked");
                        (ActivityState::Unknown, false, st.last_input_at)
                    }
                }
            }
        };
        self.publish(state, monitorable, last_input, now);
        state
    }

    fn publish(
        &self,
        state: ActivityState,
        monitorable: bool,
        last_input_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        self.tx.send_if_modified(|reading| {
            reading.last_input_at = last_input_at;
            if reading.state == state && reading.monitorable == monitorable {
                return false;
            }
            debug!(from = ?reading.state, to = ?state, monitorable, "activity transition");
            reading.state = state;
            reading.monitorable = monitorable;
            reading.since = now;
            true
        });
    }
}

async fn monitor_loop(
    shared: Arc<Shared>,
    poll_interval: std::time::Duration,
    cancel: CancellationToken,
) {
    // The first sample is taken by `start_monitoring`.
    let start = tokio::time::Instant::now() + poll_interval;
    let mut ticker = tokio::time::interval_at(start, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                shared.poll(shared.clock.now());
            }
            _ = cancel.cancelled() => {
                debug!("activity monitor loop shutting down");
                break;
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
