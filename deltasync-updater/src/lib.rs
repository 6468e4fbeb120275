//! deltasync updater — the differential update pipeline on top of `deltasync-core`.
//!
//! This crate provides:
//! - `DifferentialUpdater`: validate, diff and commit one batch per call
//! - Batch application with per-item outcomes
//! - TOML-loadable configuration
//! - Running statistics, history, backup, export and retention pass-throughs

pub mod config;
pub mod stats;
pub mod updater;

pub use config::{ConfigError, UpdaterConfig};
pub use stats::UpdaterStatistics;
pub use updater::{
    BatchResult, DifferentialUpdater, OptimizeReport, UpdateError, UpdateRequest, UpdateResult,
    UpdateStatus, UpdaterReport,
};
