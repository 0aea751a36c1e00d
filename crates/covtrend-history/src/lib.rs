//! Coverage history: an append-only, file-per-entry store of coverage snapshots
//! plus the trend analysis computed over it.

use std::path::PathBuf;

use thiserror::Error;

mod cancel;
mod entry;
mod lock;
mod predict;
mod retention;
mod store;
mod tracker;
mod trend;

pub use cancel::CancelToken;
pub use entry::{
    BuildInfo, DEFAULT_BRANCH, Entry, PackageStats, calculate_file_hashes,
    calculate_package_stats, synthesize_commit_sha,
};
pub use lock::{LOCK_FILE_NAME, LockMode, StoreLock};
pub use predict::{
    MIN_PREDICTION_ENTRIES, PREDICTION_CONFIDENCE, Prediction, PredictionPoint, PredictionRange,
    generate_prediction,
};
pub use retention::{RetentionPlan, RetentionPolicy, plan_retention};
pub use store::{EntryStore, LoadResult, SkippedEntry, StoredEntry};
pub use tracker::{
    CleanupOutcome, DEFAULT_TREND_DAYS, DEFAULT_TREND_MAX_POINTS, LATEST_ENTRY_WINDOW_DAYS,
    RecordOptions, STALE_TEMP_GRACE, Statistics, Tracker, TrendRequest,
};
pub use trend::{
    DateRange, PERIOD_CONFIDENCE, PeriodAnalysis, STABILITY_SCORE, TrendAnalysis, TrendData,
    TrendDirection, TrendSummary, analyze_period, analyze_trend, calculate_momentum,
    calculate_summary, calculate_volatility, window_cutoff,
};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("no coverage entries found for branch '{branch}' in the last {days} days")]
    NoEntriesFound { branch: String, days: u32 },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid history config: {0}")]
    InvalidConfig(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("timed out after {waited_secs}s waiting for store lock {}", path.display())]
    LockTimeout { path: PathBuf, waited_secs: u64 },
}

impl HistoryError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoEntriesFound { .. })
    }
}
