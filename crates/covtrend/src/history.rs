use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use covtrend_config::HistoryConfig;
use covtrend_core::CoverageSnapshot;
use covtrend_history::{
    BuildInfo, CancelToken, CleanupOutcome, Entry, HistoryError, RecordOptions, Statistics,
    Tracker, TrendData, TrendRequest,
};

use crate::cli::{LatestArgs, OutputFormat, RecordArgs, StatsArgs, TrendArgs};

const MAX_TREND_POINTS: usize = 1000;

pub fn open_tracker(workspace: &Path, config: &HistoryConfig) -> Result<Tracker> {
    let storage_path = config.resolve_storage_path(workspace);
    let config = config.clone().with_storage_path(storage_path);
    Tracker::new(config).context("invalid history configuration")
}

pub fn run_record_command(
    tracker: &Tracker,
    cancel: &CancelToken,
    args: RecordArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let raw = fs::read_to_string(&args.coverage)
        .with_context(|| format!("failed to read coverage snapshot {}", args.coverage.display()))?;
    let coverage: CoverageSnapshot = serde_json::from_str(&raw).with_context(|| {
        format!("failed to parse coverage snapshot {}", args.coverage.display())
    })?;

    let mut options = RecordOptions::default();
    if let Some(branch) = args.branch {
        options = options.with_branch(branch);
    }
    if let Some(commit) = args.commit {
        options = options.with_commit(commit, args.commit_url);
    }
    if let Some(project) = args.project {
        options = options.with_metadata("project", project);
    }
    for (key, value) in args.metadata {
        options = options.with_metadata(key, value);
    }
    if args.build_info_from_env {
        options = options.with_build_info(BuildInfo::from_env());
    }

    let entry = tracker
        .record(cancel, coverage, options)
        .context("failed to record coverage entry")?;
    writeln!(
        out,
        "recorded {:.2}% on {} at {}",
        entry.coverage.percentage, entry.branch, entry.commit_sha
    )?;

    if tracker.config().auto_cleanup && !args.no_cleanup {
        let outcome = tracker
            .cleanup(cancel)
            .context("retention cleanup failed")?;
        write_cleanup_outcome(&outcome, out)?;
    }
    Ok(())
}

pub fn run_latest_command(
    tracker: &Tracker,
    cancel: &CancelToken,
    args: LatestArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let entry = match tracker.latest_entry(cancel, &args.branch) {
        Ok(entry) => entry,
        Err(HistoryError::NoEntriesFound { branch, days }) => {
            return match args.output {
                OutputFormat::Json => write_json(&Option::<Entry>::None, out),
                OutputFormat::Table => {
                    writeln!(out, "no entries for {branch} in the last {days} days")?;
                    Ok(())
                }
            };
        }
        Err(err) => {
            return Err(anyhow::Error::new(err).context("failed to load latest entry"));
        }
    };

    match args.output {
        OutputFormat::Json => write_json(&entry, out),
        OutputFormat::Table => {
            write_entries_table(std::slice::from_ref(&entry), out)?;
            Ok(())
        }
    }
}

pub fn run_trend_command(
    tracker: &Tracker,
    cancel: &CancelToken,
    args: TrendArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let trend = tracker
        .trend(
            cancel,
            TrendRequest {
                branch: Some(args.branch.clone()),
                days: Some(args.days),
                max_points: Some(args.max_points.clamp(1, MAX_TREND_POINTS)),
            },
        )
        .context("failed to compute coverage trend")?;

    match args.output {
        OutputFormat::Json => write_json(&trend, out),
        OutputFormat::Table => {
            if trend.is_empty() {
                writeln!(
                    out,
                    "no entries for {} in the last {} days",
                    args.branch, args.days
                )?;
                return Ok(());
            }
            write_trend_report(&trend, out)?;
            Ok(())
        }
    }
}

pub fn run_stats_command(
    tracker: &Tracker,
    cancel: &CancelToken,
    args: StatsArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let stats = tracker
        .statistics(cancel)
        .context("failed to compute history statistics")?;
    match args.output {
        OutputFormat::Json => write_json(&stats, out),
        OutputFormat::Table => {
            write_statistics(&stats, out)?;
            Ok(())
        }
    }
}

pub fn run_cleanup_command(
    tracker: &Tracker,
    cancel: &CancelToken,
    out: &mut dyn Write,
) -> Result<()> {
    let outcome = tracker
        .cleanup(cancel)
        .context("retention cleanup failed")?;
    write_cleanup_outcome(&outcome, out)?;
    Ok(())
}

pub fn write_entries_table(entries: &[Entry], out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "timestamp\tbranch\tcommit\tcoverage\tcovered/total")?;
    for entry in entries {
        writeln!(
            out,
            "{}\t{}\t{}\t{:.2}\t{}/{}",
            entry.timestamp.to_rfc3339(),
            normalize_field(&entry.branch),
            normalize_field(&entry.commit_sha),
            entry.coverage.percentage,
            entry.coverage.covered_lines,
            entry.coverage.total_lines
        )?;
    }
    Ok(())
}

pub fn write_trend_report(trend: &TrendData, out: &mut dyn Write) -> std::io::Result<()> {
    let summary = &trend.summary;
    writeln!(
        out,
        "entries: {}  range: {} .. {}",
        summary.total_entries,
        summary.date_range.start.to_rfc3339(),
        summary.date_range.end.to_rfc3339()
    )?;
    writeln!(
        out,
        "coverage: avg {:.2}%  min {:.2}%  max {:.2}%  trend {} {}",
        summary.average_coverage,
        summary.min_coverage,
        summary.max_coverage,
        summary.current_trend.arrow(),
        summary.current_trend
    )?;

    writeln!(out, "period\tpoints\tstart\tend\tchange\tdirection\tconfidence")?;
    let analysis = &trend.analysis;
    for period in [
        &analysis.short_term,
        &analysis.medium_term,
        &analysis.long_term,
    ] {
        writeln!(
            out,
            "{}\t{}\t{:.2}\t{:.2}\t{:+.2}\t{}\t{:.0}",
            period.period,
            period.data_points,
            period.start_coverage,
            period.end_coverage,
            period.change,
            period.direction,
            period.confidence
        )?;
    }
    writeln!(
        out,
        "volatility: {:.4}  momentum: {:+.4}",
        analysis.volatility, analysis.momentum
    )?;

    match &analysis.prediction {
        Some(prediction) => writeln!(
            out,
            "prediction: next week {:.2}% [{:.2}, {:.2}]  next month {:.2}% [{:.2}, {:.2}]  confidence {:.0}",
            prediction.next_week.percentage,
            prediction.next_week.range.min,
            prediction.next_week.range.max,
            prediction.next_month.percentage,
            prediction.next_month.range.min,
            prediction.next_month.range.max,
            prediction.confidence
        )?,
        None => writeln!(out, "prediction: insufficient data")?,
    }

    writeln!(out)?;
    write_entries_table(&trend.entries, out)
}

pub fn write_statistics(stats: &Statistics, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "total entries: {}", stats.total_entries)?;
    if let (Some(oldest), Some(newest)) = (stats.oldest_entry, stats.newest_entry) {
        writeln!(
            out,
            "range: {} .. {}",
            oldest.to_rfc3339(),
            newest.to_rfc3339()
        )?;
    }
    writeln!(out, "storage bytes: {}", stats.storage_size)?;
    if stats.skipped_files > 0 {
        writeln!(out, "unreadable files: {}", stats.skipped_files)?;
    }
    for (branch, count) in &stats.branches {
        writeln!(out, "branch\t{}\t{count}", normalize_field(branch))?;
    }
    for (project, count) in &stats.projects {
        writeln!(out, "project\t{}\t{count}", normalize_field(project))?;
    }
    Ok(())
}

fn write_cleanup_outcome(outcome: &CleanupOutcome, out: &mut dyn Write) -> std::io::Result<()> {
    if !outcome.ran {
        return writeln!(out, "cleanup skipped: auto_cleanup disabled");
    }
    writeln!(
        out,
        "cleanup: kept {} removed {}",
        outcome.kept,
        outcome.removed.len()
    )?;
    if !outcome.swept_temp_files.is_empty() {
        writeln!(
            out,
            "swept {} abandoned temp files",
            outcome.swept_temp_files.len()
        )?;
    }
    for skipped in &outcome.skipped {
        writeln!(
            out,
            "unreadable: {} ({})",
            skipped.path.display(),
            skipped.reason
        )?;
    }
    Ok(())
}

fn write_json<T: serde::Serialize>(value: &T, out: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("failed to serialize JSON output")?;
    writeln!(out).context("failed to write trailing newline")?;
    Ok(())
}

fn normalize_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    use super::*;

    fn tracker_in(path: &Path) -> Tracker {
        let config = HistoryConfig::default().with_storage_path("history");
        open_tracker(path, &config).expect("open tracker")
    }

    fn record_args(coverage: PathBuf) -> RecordArgs {
        RecordArgs {
            coverage,
            branch: Some("main".to_owned()),
            commit: Some("abcdef0123".to_owned()),
            commit_url: None,
            project: Some("demo".to_owned()),
            metadata: vec![("team".to_owned(), "core".to_owned())],
            build_info_from_env: false,
            no_cleanup: false,
        }
    }

    #[test]
    fn open_tracker_resolves_storage_under_workspace() {
        let temp = tempdir().expect("tempdir");
        let tracker = tracker_in(temp.path());
        assert_eq!(tracker.store().dir(), temp.path().join("history"));
    }

    #[test]
    fn record_then_latest_prints_entry() {
        let temp = tempdir().expect("tempdir");
        let tracker = tracker_in(temp.path());
        let cancel = CancelToken::new();
        let coverage_path = temp.path().join("coverage.json");
        let snapshot = CoverageSnapshot::from_counts(200, 150);
        fs::write(
            &coverage_path,
            serde_json::to_string(&snapshot).expect("serialize"),
        )
        .expect("write snapshot");

        let mut out = Vec::new();
        run_record_command(&tracker, &cancel, record_args(coverage_path), &mut out)
            .expect("record command");
        let rendered = String::from_utf8(out).expect("utf8");
        assert!(rendered.starts_with("recorded 75.00% on main at abcdef0123"));
        assert!(rendered.contains("cleanup: kept 1 removed 0"));

        let mut out = Vec::new();
        run_latest_command(
            &tracker,
            &cancel,
            LatestArgs {
                branch: "main".to_owned(),
                output: OutputFormat::Json,
            },
            &mut out,
        )
        .expect("latest command");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("json output");
        assert_eq!(value["branch"], "main");
        assert_eq!(value["metadata"]["project"], "demo");
        assert_eq!(value["metadata"]["team"], "core");
    }

    #[test]
    fn record_rejects_unparseable_snapshot() {
        let temp = tempdir().expect("tempdir");
        let tracker = tracker_in(temp.path());
        let coverage_path = temp.path().join("coverage.json");
        fs::write(&coverage_path, "not json").expect("write snapshot");

        let err = run_record_command(
            &tracker,
            &CancelToken::new(),
            record_args(coverage_path),
            &mut Vec::new(),
        )
        .expect_err("invalid snapshot");
        assert!(err.to_string().contains("failed to parse coverage snapshot"));
    }

    #[test]
    fn latest_without_history_is_not_an_error() {
        let temp = tempdir().expect("tempdir");
        let tracker = tracker_in(temp.path());

        let mut out = Vec::new();
        run_latest_command(
            &tracker,
            &CancelToken::new(),
            LatestArgs {
                branch: "main".to_owned(),
                output: OutputFormat::Table,
            },
            &mut out,
        )
        .expect("latest command");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "no entries for main in the last 7 days\n"
        );
    }

    #[test]
    fn trend_table_lists_periods_and_entries() {
        let temp = tempdir().expect("tempdir");
        let tracker = tracker_in(temp.path());
        let cancel = CancelToken::new();
        for (days, covered) in [(1, 80), (2, 78), (3, 75)] {
            let entry = Entry::new(
                Utc::now() - Duration::days(days),
                "main",
                format!("commit{days}"),
                CoverageSnapshot::from_counts(100, covered),
            );
            tracker.store().save_entry(&cancel, &entry).expect("save");
        }

        let mut out = Vec::new();
        run_trend_command(
            &tracker,
            &cancel,
            TrendArgs {
                branch: "main".to_owned(),
                days: 30,
                max_points: 100,
                output: OutputFormat::Table,
            },
            &mut out,
        )
        .expect("trend command");
        let rendered = String::from_utf8(out).expect("utf8");

        assert!(rendered.contains("trend ↑ up"), "{rendered}");
        assert!(rendered.contains("7d\t3\t75.00\t80.00\t+5.00\tup\t85"));
        assert!(rendered.contains("prediction: insufficient data"));
        assert!(rendered.contains("timestamp\tbranch\tcommit\tcoverage\tcovered/total"));
        assert_eq!(rendered.matches("\tmain\tcommit").count(), 3);
    }

    #[test]
    fn statistics_table_reports_counts() {
        let stats = Statistics {
            total_entries: 2,
            storage_size: 512,
            skipped_files: 1,
            branches: [("main".to_owned(), 2)].into_iter().collect(),
            projects: [("demo".to_owned(), 2)].into_iter().collect(),
            ..Statistics::default()
        };

        let mut out = Vec::new();
        write_statistics(&stats, &mut out).expect("write stats");
        let rendered = String::from_utf8(out).expect("utf8");

        assert!(rendered.contains("total entries: 2"));
        assert!(rendered.contains("storage bytes: 512"));
        assert!(rendered.contains("unreadable files: 1"));
        assert!(rendered.contains("branch\tmain\t2"));
        assert!(rendered.contains("project\tdemo\t2"));
        assert!(!rendered.contains("range:"));
    }

    #[test]
    fn latest_json_without_history_prints_null() {
        let temp = tempdir().expect("tempdir");
        let tracker = tracker_in(temp.path());

        let mut out = Vec::new();
        run_latest_command(
            &tracker,
            &CancelToken::new(),
            LatestArgs {
                branch: "main".to_owned(),
                output: OutputFormat::Json,
            },
            &mut out,
        )
        .expect("latest command");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("json output");
        assert!(value.is_null());
    }
}
