//! Running counters for one updater instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use deltasync_core::DiffSummary;

use crate::updater::UpdateStatus;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdaterStatistics {
    pub total_updates: u64,
    pub successful_updates: u64,
    pub no_change_updates: u64,
    pub validation_failures: u64,
    pub failed_updates: u64,
    pub records_added: u64,
    pub records_updated: u64,
    pub records_removed: u64,
    pub total_processing_time_ms: u64,
    pub average_processing_time_ms: f64,
    pub last_update: Option<DateTime<Utc>>,
}

impl UpdaterStatistics {
    /// Fold one finished call into the counters.
    ///
    /// Record counts only move for committed updates.
    pub fn record(
        &mut self,
        status: UpdateStatus,
        diff: Option<&DiffSummary>,
        processing_time_ms: u64,
        at: DateTime<Utc>,
    ) {
        self.total_updates += 1;
        match status {
            UpdateStatus::Success => {
                self.successful_updates += 1;
                if let Some(d) = diff {
                    self.records_added += d.added as u64;
                    self.records_updated += d.updated as u64;
                    self.records_removed += d.removed as u64;
                }
            }
            UpdateStatus::NoChange => self.no_change_updates += 1,
            UpdateStatus::ValidationError => self.validation_failures += 1,
            UpdateStatus::Failed => self.failed_updates += 1,
        }
        self.total_processing_time_ms += processing_time_ms;
        self.average_processing_time_ms =
            self.total_processing_time_ms as f64 / self.total_updates as f64;
        self.last_update = Some(at);
    }

    /// Fraction of calls that ended in Success or NoChange.
    pub fn success_rate(&self) -> f64 {
        if self.total_updates == 0 {
            0.0
        } else {
            (self.successful_updates + self.no_change_updates) as f64 / self.total_updates as f64
        }
    }
}
