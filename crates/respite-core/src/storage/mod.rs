mod config;
pub mod history;
mod recorder;

pub use config::{
    ActivityConfig, BreakSettings, BreaksConfig, Config, MissedBreakAnchor, SchedulingConfig,
    SmartDelayConfig,
};
pub use history::BreakHistory;
pub use recorder::{MemoryRecorder, OutcomeRecorder};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/respite[-dev]/` based on RESPITE_ENV.
///
/// Set RESPITE_ENV=dev to use the development data directory, or
/// RESPITE_HOME to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("RESPITE_HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("RESPITE_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("respite-dev")
            } else {
                base_dir.join("respite")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
