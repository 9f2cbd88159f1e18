//! SQLite-based break history.
//!
//! Every break that reaches a terminal status (completed or skipped) is
//! stored once, keyed by its id. The history seeds the scheduler with the
//! last time each kind was taken so a restart does not reset the cadence.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::data_dir;
use super::recorder::OutcomeRecorder;
use crate::breaks::{BreakKind, BreakStatus, BreakTrigger, ScheduledBreak, SkipReason};
use crate::error::{DatabaseError, Result};

/// Row as stored, before decoding.
struct RawBreak {
    id: String,
    kind: String,
    trigger: String,
    status: String,
    scheduled_at: String,
    planned_duration_secs: i64,
    started_at: Option<String>,
    ended_at: Option<String>,
    skip_reason: Option<String>,
    paused_ms: i64,
}

/// SQLite store for break outcomes.
pub struct BreakHistory {
    conn: Mutex<Connection>,
}

impl BreakHistory {
    /// Open the history at `~/.config/respite/respite.db`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("respite.db");
        Ok(Self::open_at(&path)?)
    }

    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let history = Self {
            conn: Mutex::new(conn),
        };
        history.migrate()?;
        Ok(history)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let history = Self {
            conn: Mutex::new(conn),
        };
        history.migrate()?;
        Ok(history)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS breaks (
                    id                    TEXT PRIMARY KEY,
                    kind                  TEXT NOT NULL,
                    trigger_kind          TEXT NOT NULL,
                    status                TEXT NOT NULL,
                    scheduled_at          TEXT NOT NULL,
                    planned_duration_secs INTEGER NOT NULL,
                    started_at            TEXT,
                    ended_at              TEXT,
                    skip_reason           TEXT,
                    paused_ms             INTEGER NOT NULL DEFAULT 0,
                    recorded_at           TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_breaks_kind_started ON breaks(kind, started_at);
                CREATE INDEX IF NOT EXISTS idx_breaks_recorded_at ON breaks(recorded_at);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))
    }

    /// Store a terminal break. Re-recording the same id replaces the row.
    ///
    /// # Errors
    /// Returns an error if the break is still live or the insert fails.
    pub fn record_outcome(&self, outcome: &ScheduledBreak) -> Result<(), DatabaseError> {
        if !outcome.status.is_terminal() {
            return Err(DatabaseError::QueryFailed(format!(
                "break {} is still {}",
                outcome.id,
                outcome.status.as_str()
            )));
        }
        self.conn().execute(
            "INSERT OR REPLACE INTO breaks (
                id, kind, trigger_kind, status, scheduled_at, planned_duration_secs,
                started_at, ended_at, skip_reason, paused_ms, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                outcome.id,
                outcome.kind.as_str(),
                outcome.trigger.as_str(),
                outcome.status.as_str(),
                outcome.scheduled_at.to_rfc3339(),
                outcome.planned_duration_secs,
                outcome.started_at.map(|t| t.to_rfc3339()),
                outcome.ended_at.map(|t| t.to_rfc3339()),
                outcome.skip_reason.map(SkipReason::as_str),
                outcome.paused_ms,
                outcome
                    .ended_at
                    .unwrap_or(outcome.scheduled_at)
                    .to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent outcomes, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ScheduledBreak>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT id, kind, trigger_kind, status, scheduled_at, planned_duration_secs,
                        started_at, ended_at, skip_reason, paused_ms
                 FROM breaks
                 ORDER BY recorded_at DESC, rowid DESC
                 LIMIT ?1",
            )?;
            let mapped = stmt.query_map(params![limit], |row| {
                Ok(RawBreak {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    trigger: row.get(2)?,
                    status: row.get(3)?,
                    scheduled_at: row.get(4)?,
                    planned_duration_secs: row.get(5)?,
                    started_at: row.get(6)?,
                    ended_at: row.get(7)?,
                    skip_reason: row.get(8)?,
                    paused_ms: row.get(9)?,
                })
            })?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };
        rows.into_iter().map(decode).collect()
    }

    /// When a break of `kind` was last taken: the end of the latest break
    /// that actually started.
    pub fn last_taken(&self, kind: BreakKind) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT COALESCE(ended_at, started_at) FROM breaks
                 WHERE kind = ?1 AND started_at IS NOT NULL
                 ORDER BY started_at DESC
                 LIMIT 1",
                params![kind.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        raw.as_deref().map(parse_time).transpose()
    }

    /// Number of stored outcomes with the given status.
    pub fn count(&self, status: BreakStatus) -> Result<u64, DatabaseError> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM breaks WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

impl OutcomeRecorder for BreakHistory {
    fn record(&self, outcome: &ScheduledBreak) -> Result<()> {
        Ok(self.record_outcome(outcome)?)
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            table: "breaks".into(),
            message: format!("bad timestamp '{s}': {e}"),
        })
}

fn decode(raw: RawBreak) -> Result<ScheduledBreak, DatabaseError> {
    let kind = BreakKind::from_str(&raw.kind).map_err(|e| DatabaseError::CorruptRow {
        table: "breaks".into(),
        message: e.to_string(),
    })?;
    let mut outcome = ScheduledBreak::new(
        kind,
        BreakTrigger::from_str(&raw.trigger)?,
        parse_time(&raw.scheduled_at)?,
        Duration::seconds(raw.planned_duration_secs),
    );
    outcome.id = raw.id;
    outcome.status = BreakStatus::from_str(&raw.status)?;
    outcome.started_at = raw.started_at.as_deref().map(parse_time).transpose()?;
    outcome.ended_at = raw.ended_at.as_deref().map(parse_time).transpose()?;
    outcome.skip_reason = raw
        .skip_reason
        .as_deref()
        .map(SkipReason::from_str)
        .transpose()?;
    outcome.paused_ms = raw.paused_ms;
    Ok(outcome)
}
