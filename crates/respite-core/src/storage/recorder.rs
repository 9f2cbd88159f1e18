use std::sync::{Mutex, PoisonError};

use crate::breaks::ScheduledBreak;
use crate::error::Result;

/// Sink for breaks that reached a terminal status.
///
/// Called exactly once per break. A failure is logged by the caller and
/// never rolls back the transition that produced the outcome.
pub trait OutcomeRecorder: Send + Sync {
    fn record(&self, outcome: &ScheduledBreak) -> Result<()>;
}

/// Keeps outcomes in memory. Used when no history database is configured.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    outcomes: Mutex<Vec<ScheduledBreak>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded outcomes, oldest first.
    pub fn outcomes(&self) -> Vec<ScheduledBreak> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OutcomeRecorder for MemoryRecorder {
    fn record(&self, outcome: &ScheduledBreak) -> Result<()> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome.clone());
        Ok(())
    }
}
