use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use covtrend_core::CoverageSnapshot;
use serde::{Deserialize, Serialize};

use crate::trend::{TrendDirection, direction_from_change};

pub const DEFAULT_BRANCH: &str = "main";

const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S%.6f";
const SHORT_COMMIT_LEN: usize = 8;
const NO_COMMIT: &str = "nocommit";

/// One persisted coverage snapshot. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub timestamp: DateTime<Utc>,
    pub branch: String,
    pub commit_sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_url: Option<String>,
    pub coverage: CoverageSnapshot,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_info: Option<BuildInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub package_stats: BTreeMap<String, PackageStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BuildInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_os: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageStats {
    pub name: String,
    pub percentage: f64,
    pub previous_percentage: f64,
    pub change: f64,
    pub trend: TrendDirection,
    pub total_lines: u64,
    pub covered_lines: u64,
}

impl BuildInfo {
    /// Reads the standard CI environment. Unset variables stay `None`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        Self {
            toolchain_version: read("RUSTUP_TOOLCHAIN"),
            platform: Some(format!(
                "{}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
            workflow: read("GITHUB_WORKFLOW"),
            run_id: read("GITHUB_RUN_ID"),
            run_number: read("GITHUB_RUN_NUMBER"),
            runner_os: read("RUNNER_OS"),
        }
    }
}

impl Entry {
    pub fn new(
        timestamp: DateTime<Utc>,
        branch: impl Into<String>,
        commit_sha: impl Into<String>,
        coverage: CoverageSnapshot,
    ) -> Self {
        let file_hashes = calculate_file_hashes(&coverage);
        Self {
            timestamp,
            branch: branch.into(),
            commit_sha: commit_sha.into(),
            commit_url: None,
            coverage,
            metadata: BTreeMap::new(),
            build_info: None,
            file_hashes,
            package_stats: BTreeMap::new(),
        }
    }

    pub fn percentage(&self) -> f64 {
        self.coverage.percentage
    }

    pub fn project(&self) -> Option<&str> {
        self.metadata
            .get("project")
            .map(String::as_str)
            .filter(|project| !project.trim().is_empty())
    }

    /// `<timestamp>-<branch>-<commit[:8]>.json`; distinct for near-simultaneous writes.
    pub fn file_name(&self) -> String {
        let short_commit = sanitize_component(
            &self
                .commit_sha
                .trim()
                .chars()
                .take(SHORT_COMMIT_LEN)
                .collect::<String>(),
        );
        let short_commit = if short_commit.is_empty() {
            NO_COMMIT.to_owned()
        } else {
            short_commit
        };

        format!(
            "{}-{}-{}.json",
            self.timestamp.format(FILE_TIMESTAMP_FORMAT),
            sanitize_component(&self.branch),
            short_commit
        )
    }
}

pub fn synthesize_commit_sha(now: DateTime<Utc>) -> String {
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000));
    format!("auto_{nanos}")
}

pub fn calculate_file_hashes(coverage: &CoverageSnapshot) -> BTreeMap<String, String> {
    coverage
        .files()
        .map(|file| (file.path.clone(), file.fingerprint()))
        .collect()
}

/// Per-package deltas against the previous entry on the same branch, if any.
pub fn calculate_package_stats(
    coverage: &CoverageSnapshot,
    previous: Option<&Entry>,
) -> BTreeMap<String, PackageStats> {
    coverage
        .packages
        .values()
        .map(|package| {
            let previous_percentage = previous
                .and_then(|entry| entry.coverage.packages.get(&package.name))
                .map(|prior| prior.percentage);
            let (previous_percentage, change, trend) = match previous_percentage {
                Some(prior) => {
                    let change = package.percentage - prior;
                    (prior, change, direction_from_change(change))
                }
                None => (0.0, 0.0, TrendDirection::Stable),
            };

            (
                package.name.clone(),
                PackageStats {
                    name: package.name.clone(),
                    percentage: package.percentage,
                    previous_percentage,
                    change,
                    trend,
                    total_lines: package.total_lines,
                    covered_lines: package.covered_lines,
                },
            )
        })
        .collect()
}

fn sanitize_component(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use covtrend_core::{FileCoverage, PackageCoverage};

    use super::*;

    fn at(secs: i64, micros: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, micros * 1_000)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn file_name_uses_timestamp_branch_and_short_commit() {
        let timestamp = Utc
            .with_ymd_and_hms(2024, 3, 5, 14, 7, 9)
            .single()
            .expect("valid date")
            + chrono::Duration::microseconds(42);
        let entry = Entry::new(
            timestamp,
            "main",
            "0123456789abcdef",
            CoverageSnapshot::from_counts(10, 5),
        );

        assert_eq!(entry.file_name(), "20240305-140709.000042-main-01234567.json");
    }

    #[test]
    fn file_name_sanitizes_branch_and_handles_missing_commit() {
        let entry = Entry::new(
            at(1_700_000_000, 0),
            "feature/new thing",
            "  ",
            CoverageSnapshot::default(),
        );

        let name = entry.file_name();
        assert!(name.ends_with("-feature_new_thing-nocommit.json"), "{name}");
        assert!(!name.contains('/'));
    }

    #[test]
    fn synthesized_commit_sha_has_auto_prefix() {
        let sha = synthesize_commit_sha(at(1_700_000_000, 5));
        assert_eq!(sha, "auto_1700000000000005000");
    }

    #[test]
    fn package_stats_compare_against_previous_entry() {
        let previous = Entry::new(
            at(1_700_000_000, 0),
            "main",
            "aaa",
            CoverageSnapshot::from_counts(200, 120)
                .with_package(PackageCoverage::from_counts("core", 100, 60))
                .with_package(PackageCoverage::from_counts("cli", 100, 60)),
        );
        let current = CoverageSnapshot::from_counts(300, 200)
            .with_package(PackageCoverage::from_counts("core", 100, 80))
            .with_package(PackageCoverage::from_counts("cli", 100, 60))
            .with_package(PackageCoverage::from_counts("api", 100, 60));

        let stats = calculate_package_stats(&current, Some(&previous));

        let core = &stats["core"];
        assert_eq!(core.previous_percentage, 60.0);
        assert_eq!(core.change, 20.0);
        assert_eq!(core.trend, TrendDirection::Up);

        assert_eq!(stats["cli"].trend, TrendDirection::Stable);

        let api = &stats["api"];
        assert_eq!(api.previous_percentage, 0.0);
        assert_eq!(api.trend, TrendDirection::Stable);
    }

    #[test]
    fn package_stats_without_history_are_stable() {
        let current = CoverageSnapshot::from_counts(10, 4)
            .with_package(PackageCoverage::from_counts("core", 10, 4));

        let stats = calculate_package_stats(&current, None);
        assert_eq!(stats["core"].previous_percentage, 0.0);
        assert_eq!(stats["core"].change, 0.0);
        assert_eq!(stats["core"].trend, TrendDirection::Stable);
    }

    #[test]
    fn new_entry_derives_file_hashes() {
        let coverage = CoverageSnapshot::from_counts(10, 5).with_package(
            PackageCoverage::from_counts("core", 10, 5)
                .with_file(FileCoverage::from_counts("core/lib.rs", 10, 5)),
        );
        let entry = Entry::new(at(1_700_000_000, 0), "main", "abc", coverage);

        assert_eq!(entry.file_hashes.len(), 1);
        assert_eq!(
            entry.file_hashes["core/lib.rs"],
            FileCoverage::from_counts("core/lib.rs", 10, 5).fingerprint()
        );
    }

    #[test]
    fn build_info_reads_ci_variables() {
        let info = BuildInfo::from_lookup(|key| match key {
            "GITHUB_WORKFLOW" => Some("ci".to_owned()),
            "GITHUB_RUN_ID" => Some(" 42 ".to_owned()),
            "RUNNER_OS" => Some(String::new()),
            _ => None,
        });

        assert_eq!(info.workflow.as_deref(), Some("ci"));
        assert_eq!(info.run_id.as_deref(), Some("42"));
        assert_eq!(info.runner_os, None);
        assert!(info.platform.is_some());
    }

    #[test]
    fn project_ignores_blank_metadata() {
        let mut entry = Entry::new(at(0, 0), "main", "abc", CoverageSnapshot::default());
        assert_eq!(entry.project(), None);

        entry.metadata.insert("project".to_owned(), " ".to_owned());
        assert_eq!(entry.project(), None);

        entry.metadata.insert("project".to_owned(), "covtrend".to_owned());
        assert_eq!(entry.project(), Some("covtrend"));
    }
}
