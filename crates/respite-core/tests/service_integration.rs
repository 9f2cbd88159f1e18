use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use respite_core::{
    ActivityMonitor, ActivitySignal, ActivityState, ActivityThresholds, AlwaysAllow,
    BreakConfiguration, BreakEngine, BreakKind, BreakSchedule, BreakService, BreakStatus, Clock,
    Event, InputTracker, MemoryRecorder, SchedulerState, ScreenEvent, ServiceOptions, SkipReason,
};

/// Wall clock that follows Tokio's (pausable) clock.
struct TokioClock {
    base: DateTime<Utc>,
    origin: Instant,
}

impl TokioClock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            origin: Instant::now(),
        })
    }

    fn at(&self, secs: i64) -> DateTime<Utc> {
        self.base + Duration::seconds(secs)
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + Duration::from_std(self.origin.elapsed()).unwrap()
    }
}

struct AlwaysActive;

impl ActivitySignal for AlwaysActive {
    fn current_state(&self, _now: DateTime<Utc>) -> ActivityState {
        ActivityState::Active
    }

    fn is_authorized(&self) -> bool {
        true
    }
}

fn schedule() -> BreakSchedule {
    BreakSchedule {
        micro: BreakConfiguration::new(BreakKind::Micro, 600, 30),
        regular: BreakConfiguration::new(BreakKind::Regular, 3600, 300),
        custom: BreakConfiguration::default_for(BreakKind::Custom).disabled(),
    }
}

fn service(clock: Arc<TokioClock>, recorder: Arc<MemoryRecorder>) -> BreakService {
    let engine =
        BreakEngine::new(schedule(), Arc::new(AlwaysActive), Arc::new(AlwaysAllow), recorder);
    BreakService::spawn(
        engine,
        ServiceOptions {
            clock,
            ..ServiceOptions::default()
        },
    )
}

/// Tokio rounds timer deadlines up to the millisecond.
fn assert_near(actual: DateTime<Utc>, expected: DateTime<Utc>) {
    let drift = (actual - expected).num_milliseconds().abs();
    assert!(drift <= 2, "{actual} is {drift}ms away from {expected}");
}

async fn next_matching(
    rx: &mut broadcast::Receiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    loop {
        let event = rx.recv().await.unwrap();
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn driver_runs_a_break_to_completion() {
    let clock = TokioClock::new();
    let recorder = Arc::new(MemoryRecorder::new());
    let service = service(clock.clone(), recorder.clone());
    let mut rx = service.subscribe();

    service.start().await;

    let started = next_matching(&mut rx, |e| matches!(e, Event::BreakStarted { .. })).await;
    assert_near(started.at(), clock.at(600));

    let completed = next_matching(&mut rx, |e| matches!(e, Event::BreakCompleted { .. })).await;
    assert_near(completed.at(), clock.at(630));

    let snap = service.snapshot().await;
    assert!(snap.current.is_none());
    assert_near(snap.upcoming_for(BreakKind::Micro).unwrap().due_at.unwrap(), clock.at(1230));
    assert_eq!(recorder.outcomes()[0].status, BreakStatus::Completed);

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn nothing_fires_after_stop() {
    let clock = TokioClock::new();
    let recorder = Arc::new(MemoryRecorder::new());
    let service = service(clock.clone(), recorder.clone());
    let mut rx = service.subscribe();

    service.start().await;
    tokio::time::sleep(std::time::Duration::from_secs(300)).await;
    service.stop().await;
    assert!(service.stop().await.is_empty());

    tokio::time::sleep(std::time::Duration::from_secs(4 * 3600)).await;

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    assert!(!names.contains(&"break_started"));
    assert_eq!(names.last(), Some(&"scheduler_stopped"));
    assert_eq!(service.state().await, SchedulerState::Stopped);
    assert!(recorder.is_empty());

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_triggers_start_one_break() {
    let clock = TokioClock::new();
    let service = Arc::new(service(clock, Arc::new(MemoryRecorder::new())));
    service.start().await;

    let mut handles = Vec::new();
    for kind in [BreakKind::Micro, BreakKind::Regular, BreakKind::Custom, BreakKind::Micro] {
        let service = service.clone();
        handles.push(tokio::spawn(async move { service.trigger_break(kind).await }));
    }
    let mut started = 0;
    for handle in handles {
        started += handle
            .await
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::BreakStarted { .. }))
            .count();
    }
    assert_eq!(started, 1);

    let skipped = service.skip_current_break(SkipReason::User).await;
    assert!(matches!(skipped[0], Event::BreakSkipped { .. }));
    assert!(service.snapshot().await.current.is_none());

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn published_schedule_is_applied() {
    let clock = TokioClock::new();
    let (tx, rx) = watch::channel(schedule());
    let engine = BreakEngine::new(
        schedule(),
        Arc::new(AlwaysActive),
        Arc::new(AlwaysAllow),
        Arc::new(MemoryRecorder::new()),
    );
    let service = BreakService::spawn(
        engine,
        ServiceOptions {
            clock: clock.clone(),
            config: Some(rx),
            ..ServiceOptions::default()
        },
    );
    let mut events = service.subscribe();
    service.start().await;

    let mut faster = schedule();
    faster.micro.cadence_secs = 300;
    tx.send(faster).unwrap();

    next_matching(&mut events, |e| matches!(e, Event::ConfigurationChanged { .. })).await;
    let snap = service.snapshot().await;
    assert_eq!(snap.upcoming_for(BreakKind::Micro).unwrap().due_at, Some(clock.at(300)));
    assert_eq!(snap.upcoming_for(BreakKind::Regular).unwrap().due_at, Some(clock.at(3600)));

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn screen_sleep_turns_due_break_into_a_miss() {
    let clock = TokioClock::new();
    let tracker = Arc::new(InputTracker::new(clock.now()));
    let monitor = Arc::new(ActivityMonitor::with_clock(
        tracker,
        ActivityThresholds::new(120, 300),
        std::time::Duration::from_secs(5),
        clock.clone(),
    ));
    let engine = BreakEngine::new(
        schedule(),
        monitor.clone(),
        Arc::new(AlwaysAllow),
        Arc::new(MemoryRecorder::new()),
    );
    let service = BreakService::spawn(
        engine,
        ServiceOptions {
            clock: clock.clone(),
            monitor: Some(monitor.clone()),
            ..ServiceOptions::default()
        },
    );
    let mut rx = service.subscribe();

    service.start().await;
    assert!(monitor.is_monitoring());
    service.on_screen_event(ScreenEvent::Sleep);

    let missed = next_matching(&mut rx, |e| {
        matches!(e, Event::BreakMissed { .. } | Event::BreakStarted { .. })
    })
    .await;
    assert!(matches!(missed, Event::BreakMissed { activity: ActivityState::Away, .. }));

    service.shutdown().await;
    assert!(!monitor.is_monitoring());
}

#[tokio::test(start_paused = true)]
async fn monitor_transitions_are_stamped_by_the_injected_clock() {
    let clock = TokioClock::new();
    let tracker = Arc::new(InputTracker::new(clock.now()));
    let monitor = ActivityMonitor::with_clock(
        tracker,
        ActivityThresholds::new(120, 300),
        std::time::Duration::from_secs(5),
        clock.clone(),
    );

    assert!(monitor.start_monitoring());
    assert_eq!(monitor.reading().since, clock.at(0));

    tokio::time::sleep(std::time::Duration::from_secs(130)).await;
    let reading = monitor.reading();
    assert_eq!(reading.state, ActivityState::Inactive);
    assert!(
        reading.since >= clock.at(120) && reading.since <= clock.at(125),
        "transition stamped at {}",
        reading.since
    );

    monitor.stop_monitoring().await;
    assert_eq!(monitor.reading().state, ActivityState::Unknown);
    assert!(monitor.reading().since >= clock.at(130));
}
