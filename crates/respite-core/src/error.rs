//! Error types for respite-core.
//!
//! Errors here never abort the scheduling loop: the engine logs them and
//! keeps itself in a well-defined state. They exist so collaborators
//! (storage, signal sources, configuration) can report what went wrong.

use std::path::PathBuf;
use thiserror::Error;

use crate::breaks::BreakStatus;

/// Anything the core can fail with.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("break history: {0}")]
    Database(#[from] DatabaseError),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("signal: {0}")]
    Signal(#[from] SignalError),

    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Break history (SQLite) failures.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("cannot open break history at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("history query failed: {0}")]
    QueryFailed(String),

    #[error("history schema setup failed: {0}")]
    MigrationFailed(String),

    /// Another process holds the write lock.
    #[error("break history is busy")]
    Locked,

    #[error("unreadable row in '{table}': {message}")]
    CorruptRow { table: String, message: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("data directory unavailable: {0}")]
    DataDir(String),

    #[error("cannot read {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    #[error("cannot write {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Dot-path that names no setting.
    #[error("unknown key: {0}")]
    UnknownKey(String),

    #[error("bad value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Failure of an external signal source (calendar, foreground app, focus mode).
///
/// The context evaluator treats every variant as "no opinion".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// The user has not granted access to the underlying source
    #[error("{source_name} access not authorized")]
    Unauthorized { source_name: String },

    /// The source exists but could not answer right now
    #[error("{source_name} unavailable: {message}")]
    Unavailable {
        source_name: String,
        message: String,
    },
}

/// Failure of the idle-time probe behind the activity monitor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Input monitoring permission is missing
    #[error("input monitoring not authorized")]
    Unauthorized,
}

/// Rejected break lifecycle transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {action} a break that is {from:?}")]
pub struct TransitionError {
    pub from: BreakStatus,
    pub action: &'static str,
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        let busy = matches!(
            err.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        );
        if busy {
            DatabaseError::Locked
        } else {
            DatabaseError::QueryFailed(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
