//! Async front for [`BreakEngine`].
//!
//! One `tokio::sync::Mutex` serializes every mutation: commands from callers,
//! timer fires from the driver task and configuration changes. The driver
//! sleeps until the engine's next deadline, or until a command, a new
//! schedule or cancellation wakes it, then ticks under the lock.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::{ActivityMonitor, ActivitySignal, ScreenEvent};
use crate::breaks::{BreakKind, BreakSchedule, SkipReason, MAX_INTERVAL_SECS};
use crate::clock::{Clock, SystemClock};
use crate::engine::{BreakEngine, EngineSnapshot, SchedulerState};
use crate::events::Event;

pub struct ServiceOptions {
    pub clock: Arc<dyn Clock>,
    /// New schedules are applied as they are published.
    pub config: Option<watch::Receiver<BreakSchedule>>,
    /// Started and stopped together with the scheduler. Build it with the
    /// same clock (`ActivityMonitor::with_clock`).
    pub monitor: Option<Arc<ActivityMonitor>>,
    /// How often a dormant monitor re-checks its permission.
    pub permission_recheck: std::time::Duration,
    pub event_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            config: None,
            monitor: None,
            permission_recheck: std::time::Duration::from_secs(5),
            event_capacity: 64,
        }
    }
}

pub struct BreakService {
    engine: Arc<Mutex<BreakEngine>>,
    events: broadcast::Sender<Event>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
    monitor: Option<Arc<ActivityMonitor>>,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl BreakService {
    /// Wrap `engine` and spawn the driver task. Must be called from within a
    /// Tokio runtime.
    pub fn spawn(engine: BreakEngine, options: ServiceOptions) -> Self {
        let engine = Arc::new(Mutex::new(engine));
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let wake = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(drive(Driver {
            engine: engine.clone(),
            events: events.clone(),
            wake: wake.clone(),
            cancel: cancel.clone(),
            clock: options.clock.clone(),
            config: options.config,
            monitor: options.monitor.clone(),
            permission_recheck: options.permission_recheck,
        }));

        Self {
            engine,
            events,
            wake,
            cancel,
            clock: options.clock,
            monitor: options.monitor,
            driver: StdMutex::new(Some(driver)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let now = self.clock.now();
        self.engine.lock().await.snapshot(now)
    }

    pub async fn state(&self) -> SchedulerState {
        self.engine.lock().await.state()
    }

    pub async fn start(&self) -> Vec<Event> {
        let events = self.apply(|engine, now| engine.start(now)).await;
        if let Some(monitor) = &self.monitor {
            monitor.start_monitoring();
        }
        events
    }

    /// No break fires after this returns: every timer is cancelled under the lock.
    pub async fn stop(&self) -> Vec<Event> {
        let events = self.apply(|engine, now| engine.stop(now)).await;
        if let Some(monitor) = &self.monitor {
            monitor.stop_monitoring().await;
        }
        events
    }

    pub async fn pause(&self) -> Vec<Event> {
        self.apply(|engine, now| engine.pause(now)).await
    }

    pub async fn resume(&self) -> Vec<Event> {
        self.apply(|engine, now| engine.resume(now)).await
    }

    pub async fn trigger_break(&self, kind: BreakKind) -> Vec<Event> {
        self.apply(|engine, now| engine.trigger_break(kind, now)).await
    }

    pub async fn skip_current_break(&self, reason: SkipReason) -> Vec<Event> {
        self.apply(|engine, now| engine.skip_current_break(reason, now))
            .await
    }

    pub async fn pause_current_break(&self) -> Vec<Event> {
        self.apply(|engine, now| engine.pause_current_break(now)).await
    }

    pub async fn resume_current_break(&self) -> Vec<Event> {
        self.apply(|engine, now| engine.resume_current_break(now))
            .await
    }

    pub async fn update_schedule(&self, schedule: BreakSchedule) -> Vec<Event> {
        self.apply(|engine, now| engine.update_schedule(schedule, now))
            .await
    }

    /// Forward a screen sleep/wake to the activity monitor, if any.
    pub fn on_screen_event(&self, event: ScreenEvent) {
        match &self.monitor {
            Some(monitor) => monitor.on_screen_event(event, self.clock.now()),
            None => debug!(?event, "screen event ignored: no activity monitor"),
        }
    }

    /// Stop scheduling, cancel the driver and wait for it to exit.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.cancel.cancel();
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = driver {
            if let Err(err) = handle.await {
                warn!(%err, "break driver task failed to join");
            }
        }
        info!("break service shut down");
    }

    async fn apply<F>(&self, command: F) -> Vec<Event>
    where
        F: FnOnce(&mut BreakEngine, DateTime<Utc>) -> Vec<Event>,
    {
        let produced = {
            let mut engine = self.engine.lock().await;
            let produced = command(&mut engine, self.clock.now());
            publish(&self.events, &produced);
            produced
        };
        self.wake.notify_one();
        produced
    }
}

fn publish(tx: &broadcast::Sender<Event>, events: &[Event]) {
    for event in events {
        // No subscribers is fine.
        let _ = tx.send(event.clone());
    }
}

struct Driver {
    engine: Arc<Mutex<BreakEngine>>,
    events: broadcast::Sender<Event>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
    config: Option<watch::Receiver<BreakSchedule>>,
    monitor: Option<Arc<ActivityMonitor>>,
    permission_recheck: std::time::Duration,
}

enum Wakeup {
    Shutdown,
    Command,
    Deadline,
    Config(Option<BreakSchedule>),
    PermissionCheck,
}

async fn drive(mut driver: Driver) {
    let recheck = driver.permission_recheck.clamp(
        std::time::Duration::from_millis(1),
        std::time::Duration::from_secs(MAX_INTERVAL_SECS.unsigned_abs()),
    );
    let mut permission = tokio::time::interval(recheck);
    permission.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let has_monitor = driver.monitor.is_some();

    loop {
        let sleep_for = {
            let engine = driver.engine.lock().await;
            engine
                .next_deadline()
                .map(|deadline| (deadline - driver.clock.now()).to_std().unwrap_or_default())
        };

        let wakeup = tokio::select! {
            _ = driver.cancel.cancelled() => Wakeup::Shutdown,
            _ = driver.wake.notified() => Wakeup::Command,
            _ = sleep_or_forever(sleep_for) => Wakeup::Deadline,
            schedule = next_schedule(&mut driver.config) => Wakeup::Config(schedule),
            _ = permission.tick(), if has_monitor => Wakeup::PermissionCheck,
        };

        match wakeup {
            Wakeup::Shutdown => break,
            Wakeup::Command => continue,
            Wakeup::Deadline => {
                let mut engine = driver.engine.lock().await;
                let produced = engine.tick(driver.clock.now());
                publish(&driver.events, &produced);
            }
            Wakeup::Config(Some(schedule)) => {
                let mut engine = driver.engine.lock().await;
                let produced = engine.update_schedule(schedule, driver.clock.now());
                publish(&driver.events, &produced);
            }
            Wakeup::Config(None) => {
                debug!("configuration source closed");
                driver.config = None;
            }
            Wakeup::PermissionCheck => {
                recheck_permission(&driver).await;
            }
        }
    }
    debug!("break driver exited");
}

async fn recheck_permission(driver: &Driver) {
    let Some(monitor) = &driver.monitor else {
        return;
    };
    if monitor.is_monitoring() || !monitor.is_authorized() {
        return;
    }
    if driver.engine.lock().await.state() == SchedulerState::Stopped {
        return;
    }
    if monitor.start_monitoring() {
        info!("input monitoring permission granted, activity monitoring resumed");
    }
}

async fn sleep_or_forever(duration: Option<std::time::Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

async fn next_schedule(rx: &mut Option<watch::Receiver<BreakSchedule>>) -> Option<BreakSchedule> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}
