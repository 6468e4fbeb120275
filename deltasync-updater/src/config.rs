//! Updater configuration, loadable from TOML.
//!
//! Every field has a default, so a partial file (or none at all) is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use deltasync_core::diff::{DiffOptions, SignificancePolicy};
use deltasync_core::{StoreOptions, ValidationRules};

/// Highest rounding precision accepted for hashing and comparison.
pub const MAX_DECIMALS: u32 = 12;

/// Longest "recent updates" window: one hundred years.
pub const MAX_RECENT_WINDOW_HOURS: i64 = 24 * 365 * 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Directory holding the store files.
    pub store_root: PathBuf,
    pub cache_capacity: usize,
    /// Rounding precision for hashing and field comparison.
    pub decimals: u32,
    /// Changed records needed before an update is persisted.
    pub min_changed_records: usize,
    /// Relative close move against stored data that triggers a warning.
    pub max_close_move: f64,
    pub diff_log_capacity: usize,
    pub history_capacity: usize,
    pub max_backups_per_symbol: usize,
    pub recent_window_hours: i64,
    /// Take a best-effort backup of the stored snapshot before each committed update.
    pub backup_before_update: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        let store = StoreOptions::default();
        let diff = DiffOptions::default();
        Self {
            store_root: PathBuf::from("data"),
            cache_capacity: diff.cache_capacity,
            decimals: diff.decimals,
            min_changed_records: diff.significance.min_changed_records,
            max_close_move: ValidationRules::default().max_close_move,
            diff_log_capacity: store.diff_log_capacity,
            history_capacity: store.history_capacity,
            max_backups_per_symbol: store.max_backups_per_symbol,
            recent_window_hours: store.recent_window_hours,
            backup_before_update: false,
        }
    }
}

impl UpdaterConfig {
    /// Defaults with a different store root.
    pub fn with_root(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            ..Self::default()
        }
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decimals > MAX_DECIMALS {
            return Err(ConfigError::Invalid(format!(
                "decimals must be at most {MAX_DECIMALS}, got {}",
                self.decimals
            )));
        }
        if self.min_changed_records == 0 {
            return Err(ConfigError::Invalid(
                "min_changed_records must be at least 1".into(),
            ));
        }
        if !(self.max_close_move.is_finite() && self.max_close_move > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "max_close_move must be positive, got {}",
                self.max_close_move
            )));
        }
        if self.diff_log_capacity == 0 || self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "diff_log_capacity and history_capacity must be non-zero".into(),
            ));
        }
        if !(1..=MAX_RECENT_WINDOW_HOURS).contains(&self.recent_window_hours) {
            return Err(ConfigError::Invalid(format!(
                "recent_window_hours must be in 1..={MAX_RECENT_WINDOW_HOURS}, got {}",
                self.recent_window_hours
            )));
        }
        Ok(())
    }

    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            cache_capacity: self.cache_capacity,
            decimals: self.decimals,
            significance: SignificancePolicy {
                min_changed_records: self.min_changed_records,
            },
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            diff_log_capacity: self.diff_log_capacity,
            history_capacity: self.history_capacity,
            max_backups_per_symbol: self.max_backups_per_symbol,
            recent_window_hours: self.recent_window_hours,
        }
    }

    pub fn validation_rules(&self) -> ValidationRules {
        ValidationRules {
            max_close_move: self.max_close_move,
            ..ValidationRules::default()
        }
    }
}
