use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use covtrend_config::HistoryConfig;
use covtrend_core::CoverageSnapshot;
use serde::{Deserialize, Serialize};

use crate::HistoryError;
use crate::cancel::CancelToken;
use crate::entry::{
    BuildInfo, DEFAULT_BRANCH, Entry, calculate_package_stats, synthesize_commit_sha,
};
use crate::lock::LockMode;
use crate::retention::{RetentionPolicy, plan_retention};
use crate::store::{EntryStore, SkippedEntry};
use crate::trend::{TrendData, analyze_trend, calculate_summary};

pub const LATEST_ENTRY_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_TREND_DAYS: u32 = 30;
pub const DEFAULT_TREND_MAX_POINTS: usize = 100;
/// Age after which an unpublished temp file is treated as abandoned by a dead writer.
pub const STALE_TEMP_GRACE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordOptions {
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub commit_url: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub build_info: Option<BuildInfo>,
}

impl RecordOptions {
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_commit(mut self, sha: impl Into<String>, url: Option<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self.commit_url = url;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_build_info(mut self, build_info: BuildInfo) -> Self {
        self.build_info = Some(build_info);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TrendRequest {
    pub branch: Option<String>,
    pub days: Option<u32>,
    pub max_points: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Statistics {
    pub total_entries: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
    pub projects: BTreeMap<String, usize>,
    pub branches: BTreeMap<String, usize>,
    pub storage_size: u64,
    pub skipped_files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CleanupOutcome {
    pub ran: bool,
    pub kept: usize,
    pub removed: Vec<PathBuf>,
    pub skipped: Vec<SkippedEntry>,
    pub swept_temp_files: Vec<PathBuf>,
}

/// Public entry point to the coverage history. Holds configuration only;
/// every call reads the store afresh.
#[derive(Debug, Clone)]
pub struct Tracker {
    config: HistoryConfig,
    store: EntryStore,
}

impl Tracker {
    pub fn new(config: HistoryConfig) -> Result<Self, HistoryError> {
        if config.auto_cleanup && config.retention_days == 0 {
            return Err(HistoryError::InvalidConfig(
                "retention_days must be > 0 when auto_cleanup is enabled".to_owned(),
            ));
        }
        if config.auto_cleanup && config.max_entries == 0 {
            return Err(HistoryError::InvalidConfig(
                "max_entries must be > 0 when auto_cleanup is enabled".to_owned(),
            ));
        }

        let store = EntryStore::new(config.storage_path.clone());
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn record(
        &self,
        cancel: &CancelToken,
        coverage: CoverageSnapshot,
        options: RecordOptions,
    ) -> Result<Entry, HistoryError> {
        cancel.check()?;
        let started = Instant::now();
        let now = Utc::now();

        let branch = normalize_branch(options.branch.as_deref());
        let commit_sha = options
            .commit_sha
            .map(|sha| sha.trim().to_owned())
            .filter(|sha| !sha.is_empty())
            .unwrap_or_else(|| synthesize_commit_sha(now));

        let previous = self.previous_entry(cancel, &branch)?;

        let mut entry = Entry::new(now, branch, commit_sha, coverage);
        entry.commit_url = options.commit_url.filter(|url| !url.trim().is_empty());
        entry.metadata = options.metadata;
        entry.build_info = options.build_info;
        entry.package_stats = calculate_package_stats(&entry.coverage, previous.as_ref());

        let _lock = self.store.lock(LockMode::Shared)?;
        let path = self.store.save_entry(cancel, &entry)?;

        if self.config.metrics_enabled {
            tracing::info!(
                path = %path.display(),
                branch = %entry.branch,
                percentage = entry.coverage.percentage,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "recorded coverage entry"
            );
        }
        Ok(entry)
    }

    /// Newest entry on `branch` within the last [`LATEST_ENTRY_WINDOW_DAYS`] days.
    pub fn latest_entry(&self, cancel: &CancelToken, branch: &str) -> Result<Entry, HistoryError> {
        cancel.check()?;
        let branch = normalize_branch(Some(branch));
        let loaded = self.store.load_entries(
            cancel,
            &branch,
            LATEST_ENTRY_WINDOW_DAYS,
            1,
            Utc::now(),
        )?;

        loaded
            .into_entries()
            .into_iter()
            .next()
            .ok_or_else(|| HistoryError::NoEntriesFound {
                branch,
                days: LATEST_ENTRY_WINDOW_DAYS,
            })
    }

    /// An empty window yields an empty `TrendData`, not an error.
    pub fn trend(
        &self,
        cancel: &CancelToken,
        request: TrendRequest,
    ) -> Result<TrendData, HistoryError> {
        cancel.check()?;
        let started = Instant::now();
        let now = Utc::now();
        let branch = normalize_branch(request.branch.as_deref());
        let days = request.days.unwrap_or(DEFAULT_TREND_DAYS);
        let max_points = request.max_points.unwrap_or(DEFAULT_TREND_MAX_POINTS);

        let entries = self
            .store
            .load_entries(cancel, &branch, days, max_points, now)?
            .into_entries();
        if entries.is_empty() {
            return Ok(TrendData::default());
        }

        let trend = TrendData {
            summary: calculate_summary(&entries),
            analysis: analyze_trend(&entries, now),
            generated_at: now,
            entries,
        };

        if self.config.metrics_enabled {
            tracing::info!(
                branch = %branch,
                days,
                data_points = trend.entries.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "computed coverage trend"
            );
        }
        Ok(trend)
    }

    /// Applies retention, deleting only the entries that fall outside it.
    pub fn cleanup(&self, cancel: &CancelToken) -> Result<CleanupOutcome, HistoryError> {
        cancel.check()?;
        if !self.config.auto_cleanup {
            return Ok(CleanupOutcome::default());
        }

        let _lock = self.store.lock(LockMode::Exclusive)?;
        let loaded = self.store.load_all_entries(cancel)?;
        let plan = plan_retention(
            &loaded.entries,
            RetentionPolicy::from(&self.config),
            Utc::now(),
        );

        if !plan.is_noop() {
            self.store.remove_entries(cancel, &plan.drop)?;
            tracing::info!(
                removed = plan.drop.len(),
                kept = plan.keep.len(),
                retention_days = self.config.retention_days,
                max_entries = self.config.max_entries,
                "pruned coverage history"
            );
        }

        let swept_temp_files =
            self.store
                .remove_stale_temp_files(cancel, STALE_TEMP_GRACE, SystemTime::now())?;

        Ok(CleanupOutcome {
            ran: true,
            kept: plan.keep.len(),
            removed: plan.drop,
            skipped: loaded.skipped,
            swept_temp_files,
        })
    }

    pub fn statistics(&self, cancel: &CancelToken) -> Result<Statistics, HistoryError> {
        cancel.check()?;
        let loaded = self.store.load_all_entries(cancel)?;

        let mut stats = Statistics {
            total_entries: loaded.entries.len(),
            oldest_entry: loaded.entries.last().map(|stored| stored.entry.timestamp),
            newest_entry: loaded.entries.first().map(|stored| stored.entry.timestamp),
            skipped_files: loaded.skipped.len(),
            ..Statistics::default()
        };
        for stored in &loaded.entries {
            if let Some(project) = stored.entry.project() {
                *stats.projects.entry(project.to_owned()).or_default() += 1;
            }
            *stats.branches.entry(stored.entry.branch.clone()).or_default() += 1;
        }

        cancel.check()?;
        stats.storage_size = self.store.storage_size(cancel)?;
        Ok(stats)
    }

    fn previous_entry(
        &self,
        cancel: &CancelToken,
        branch: &str,
    ) -> Result<Option<Entry>, HistoryError> {
        match self.store.load_all_entries(cancel) {
            Ok(loaded) => Ok(loaded
                .into_entries()
                .into_iter()
                .find(|entry| entry.branch == branch)),
            Err(HistoryError::Cancelled) => Err(HistoryError::Cancelled),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    branch,
                    "could not load previous entry, package deltas will be empty"
                );
                Ok(None)
            }
        }
    }
}

/// Trimmed branch name; blank or missing means [`DEFAULT_BRANCH`].
fn normalize_branch(branch: Option<&str>) -> String {
    branch
        .map(str::trim)
        .filter(|branch| !branch.is_empty())
        .unwrap_or(DEFAULT_BRANCH)
        .to_owned()
}
