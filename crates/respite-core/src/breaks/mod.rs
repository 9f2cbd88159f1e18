mod kind;
mod session;

pub use kind::{BreakConfiguration, BreakKind, BreakSchedule};
pub(crate) use kind::{bounded_secs, MAX_INTERVAL_SECS};
pub use session::{BreakStatus, BreakTrigger, ScheduledBreak, SkipReason};
