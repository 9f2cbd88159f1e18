//! Foreground scheduler driven from stdin.
//!
//! Every line typed counts as user input for the activity monitor. Lines
//! that parse as a command are applied to the running service.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use respite_core::context::{AppInfo, FocusModeSource, ForegroundAppSource};
use respite_core::{
    ActivityMonitor, BreakEngine, BreakHistory, BreakKind, BreakService, Config, ContextEvaluator,
    Event, InputTracker, MemoryRecorder, OutcomeRecorder, ScreenEvent, ServiceOptions,
    SchedulingPolicy, SignalError, SkipReason,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Skip,
    Pause,
    Resume,
    PauseBreak,
    ResumeBreak,
    Trigger(BreakKind),
    Status,
    Sleep,
    Wake,
    Stop,
    Start,
    Reload,
    DoNotDisturb(bool),
    /// Frontmost application bundle id; `None` clears it.
    App(Option<String>),
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".into());
        };
        let arg = words.next();
        let command = match (verb.to_lowercase().as_str(), arg) {
            ("skip", None) => Command::Skip,
            ("pause", None) => Command::Pause,
            ("resume", None) => Command::Resume,
            ("pause-break", None) => Command::PauseBreak,
            ("resume-break", None) => Command::ResumeBreak,
            ("trigger", Some(kind)) => {
                Command::Trigger(kind.parse::<BreakKind>().map_err(|e| e.to_string())?)
            }
            ("status", None) => Command::Status,
            ("sleep", None) => Command::Sleep,
            ("wake", None) => Command::Wake,
            ("stop", None) => Command::Stop,
            ("start", None) => Command::Start,
            ("reload", None) => Command::Reload,
            ("dnd", Some("on")) => Command::DoNotDisturb(true),
            ("dnd", Some("off")) => Command::DoNotDisturb(false),
            ("app", Some("none")) => Command::App(None),
            ("app", Some(id)) => Command::App(Some(id.to_string())),
            ("quit" | "exit", None) => Command::Quit,
            _ => return Err(format!("unrecognized command: {line}")),
        };
        if words.next().is_some() {
            return Err(format!("too many arguments: {line}"));
        }
        Ok(command)
    }
}

/// Focus mode toggled from stdin.
#[derive(Default)]
struct ManualFocus(AtomicBool);

impl FocusModeSource for ManualFocus {
    fn focus_active(&self) -> Result<bool, SignalError> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

/// Frontmost application announced from stdin.
#[derive(Default)]
struct ManualForeground(Mutex<Option<String>>);

impl ForegroundAppSource for ManualForeground {
    fn frontmost_app(&self) -> Result<Option<AppInfo>, SignalError> {
        let app = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(app.as_ref().map(|id| AppInfo {
            bundle_id: id.clone(),
            name: id.clone(),
            fullscreen: false,
        }))
    }
}

pub fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_foreground(json))
}

async fn run_foreground(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let schedule = config.break_schedule();

    let (recorder, seeds): (Arc<dyn OutcomeRecorder>, Vec<_>) = match BreakHistory::open() {
        Ok(history) => {
            let mut seeds = Vec::new();
            for kind in BreakKind::ALL {
                match history.last_taken(kind) {
                    Ok(Some(at)) => seeds.push((kind, at)),
                    Ok(None) => {}
                    Err(e) => warn!(kind = %kind, error = %e, "could not read break history"),
                }
            }
            (Arc::new(history), seeds)
        }
        Err(e) => {
            warn!(error = %e, "break history unavailable, outcomes kept in memory");
            (Arc::new(MemoryRecorder::new()), Vec::new())
        }
    };

    let tracker = Arc::new(InputTracker::new(Utc::now()));
    let monitor = Arc::new(ActivityMonitor::new(
        tracker.clone(),
        config.activity_thresholds(),
        config.activity_poll_interval(),
    ));

    let focus = Arc::new(ManualFocus::default());
    let foreground = Arc::new(ManualForeground::default());
    let evaluator = ContextEvaluator::standard(
        &config.smart_delay,
        None,
        Some(foreground.clone()),
        Some(focus.clone()),
    );
    debug!(signals = ?evaluator.signal_names(), "smart delay signals");

    let mut engine = BreakEngine::new(schedule, monitor.clone(), Arc::new(evaluator), recorder)
        .with_policy(SchedulingPolicy::from(&config.scheduling));
    for (kind, at) in seeds {
        engine.seed_last_fired(kind, at);
    }

    let (schedule_tx, schedule_rx) = watch::channel(schedule);
    let service = BreakService::spawn(
        engine,
        ServiceOptions {
            config: Some(schedule_rx),
            monitor: config.activity.enabled.then(|| monitor.clone()),
            ..ServiceOptions::default()
        },
    );
    let printer = tokio::spawn(print_events(service.subscribe(), json));

    if config.scheduling.autostart {
        service.start().await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        tracker.record_input(Utc::now());
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match command {
            Command::Skip => {
                service.skip_current_break(SkipReason::User).await;
            }
            Command::Pause => {
                service.pause().await;
            }
            Command::Resume => {
                service.resume().await;
            }
            Command::PauseBreak => {
                service.pause_current_break().await;
            }
            Command::ResumeBreak => {
                service.resume_current_break().await;
            }
            Command::Trigger(kind) => {
                if service.trigger_break(kind).await.is_empty() {
                    eprintln!("a break is already in progress");
                }
            }
            Command::Status => {
                let snapshot = service.snapshot().await;
                println!("{}", serde_json::to_string(&snapshot)?);
            }
            Command::Sleep => service.on_screen_event(ScreenEvent::Sleep),
            Command::Wake => service.on_screen_event(ScreenEvent::Wake),
            Command::Stop => {
                service.stop().await;
            }
            Command::Start => {
                service.start().await;
            }
            Command::Reload => match Config::load() {
                Ok(fresh) => {
                    monitor.set_thresholds(fresh.activity_thresholds(), Utc::now());
                    // The driver applies the schedule and reports what changed.
                    let _ = schedule_tx.send(fresh.break_schedule());
                    info!("configuration reloaded");
                }
                Err(e) => warn!(error = %e, "configuration reload failed"),
            },
            Command::DoNotDisturb(on) => focus.0.store(on, Ordering::SeqCst),
            Command::App(id) => {
                *foreground.0.lock().unwrap_or_else(PoisonError::into_inner) = id;
            }
            Command::Quit => break,
        }
    }

    service.shutdown().await;
    drop(service);
    if let Err(e) = printer.await {
        warn!(error = %e, "event printer failed to join");
    }
    Ok(())
}

async fn print_events(mut rx: broadcast::Receiver<Event>, json: bool) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "could not serialize event"),
                    }
                } else {
                    println!("{}", describe(&event));
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "event output fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn describe(event: &Event) -> String {
    let time = event.at().with_timezone(&chrono::Local).format("%H:%M:%S");
    let detail = match event {
        Event::SchedulerStarted { state, .. } | Event::SchedulerResumed { state, .. } => {
            format!("{state:?}").to_lowercase()
        }
        Event::BreakScheduled { kind, due_at, .. } => format!(
            "{kind} due at {}",
            due_at.with_timezone(&chrono::Local).format("%H:%M:%S")
        ),
        Event::BreakStarted {
            kind, duration_secs, ..
        } => format!("{kind} for {duration_secs}s"),
        Event::BreakPaused {
            kind, remaining_ms, ..
        }
        | Event::BreakResumed {
            kind, remaining_ms, ..
        } => format!("{kind}, {}s left", remaining_ms / 1000),
        Event::BreakCompleted {
            kind, actual_secs, ..
        } => format!("{kind} after {actual_secs}s"),
        Event::BreakSkipped { kind, reason, .. } => format!("{kind} ({reason})"),
        Event::BreakDeferred {
            kind,
            reason,
            detail,
            retry_at,
            ..
        } => format!(
            "{kind} ({reason:?}: {detail}), retry at {}",
            retry_at.with_timezone(&chrono::Local).format("%H:%M:%S")
        ),
        Event::BreakMissed { kind, activity, .. } => format!("{kind} (user {activity:?})"),
        Event::ConfigurationChanged { kinds, .. } => format!("{kinds:?}"),
        Event::SchedulerStopped { .. } | Event::SchedulerPaused { .. } => String::new(),
    };
    format!("{time} {} {detail}", event.name()).trim_end().to_string()
}
