//! # Respite Core Library
//!
//! This library decides whether and when to interrupt the user with a rest
//! break. It weighs a fixed per-kind cadence against live signals: the user
//! being away, a meeting in progress, a presentation, an excluded
//! application or do-not-disturb.
//!
//! ## Architecture
//!
//! - **Timer Set**: named wall-clock countdowns with group pause/resume. The
//!   caller polls it; there is no internal thread
//! - **Activity**: idle-time classification published on a watch channel
//! - **Context**: prioritized smart-delay signals (calendar, apps, focus mode)
//! - **Engine**: the scheduling state machine and the break lifecycle
//! - **Service**: async single-writer wrapper that drives the engine
//! - **Storage**: TOML configuration and SQLite break history
//!
//! ## Key Components
//!
//! - [`BreakEngine`]: Scheduling state machine
//! - [`BreakService`]: Tokio driver and command surface
//! - [`ContextEvaluator`]: Smart delay policy
//! - [`ActivityMonitor`]: Presence detection
//! - [`BreakHistory`]: Outcome persistence
//! - [`Config`]: Application configuration management

pub mod activity;
pub mod breaks;
pub mod clock;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod service;
pub mod storage;
pub mod timer;

pub use activity::{
    ActivityMonitor, ActivityReading, ActivitySignal, ActivityState, ActivityThresholds, IdleProbe,
    InputTracker, ScreenEvent,
};
pub use breaks::{
    BreakConfiguration, BreakKind, BreakSchedule, BreakStatus, BreakTrigger, ScheduledBreak,
    SkipReason,
};
pub use clock::{Clock, SystemClock};
pub use context::{
    AlwaysAllow, ContextEvaluator, ContextSignal, DelayAdvisor, DelayReason, DelayRequest,
    DelayVerdict,
};
pub use engine::{BreakEngine, EngineSnapshot, SchedulerState, SchedulingPolicy};
pub use error::{ConfigError, CoreError, DatabaseError, ProbeError, SignalError, TransitionError};
pub use events::Event;
pub use service::{BreakService, ServiceOptions};
pub use storage::{BreakHistory, Config, MemoryRecorder, OutcomeRecorder};
pub use timer::{Fired, TimerSet};
