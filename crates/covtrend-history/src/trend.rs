use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::predict::{Prediction, generate_prediction};

/// Fixed score reported until stability is derived from the series itself.
pub const STABILITY_SCORE: f64 = 85.0;
/// Fixed confidence reported for any period with at least two data points.
pub const PERIOD_CONFIDENCE: f64 = 85.0;

const DIRECTION_THRESHOLD: f64 = 0.1;
const SHORT_TERM_DAYS: u32 = 7;
const MEDIUM_TERM_DAYS: u32 = 30;
const LONG_TERM_DAYS: u32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    #[default]
    Stable,
}

impl TrendDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Stable => "stable",
        }
    }

    pub fn arrow(self) -> &'static str {
        match self {
            Self::Up => "↑",
            Self::Down => "↓",
            Self::Stable => "→",
        }
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrendDirection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "stable" => Ok(Self::Stable),
            other => Err(format!(
                "invalid trend direction '{other}', expected one of: up, down, stable"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrendSummary {
    pub total_entries: usize,
    pub date_range: DateRange,
    pub average_coverage: f64,
    pub min_coverage: f64,
    pub max_coverage: f64,
    pub current_trend: TrendDirection,
    pub trend_strength: f64,
    pub stability_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PeriodAnalysis {
    pub period: String,
    pub days: u32,
    pub start_coverage: f64,
    pub end_coverage: f64,
    pub change: f64,
    pub change_percent: f64,
    pub direction: TrendDirection,
    pub data_points: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrendAnalysis {
    pub short_term: PeriodAnalysis,
    pub medium_term: PeriodAnalysis,
    pub long_term: PeriodAnalysis,
    pub volatility: f64,
    pub momentum: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Prediction>,
}

/// Computed on demand for one branch/window; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrendData {
    pub entries: Vec<Entry>,
    pub summary: TrendSummary,
    pub analysis: TrendAnalysis,
    pub generated_at: DateTime<Utc>,
}

impl TrendData {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// All functions below expect `entries` ordered newest first.

pub fn calculate_summary(entries: &[Entry]) -> TrendSummary {
    let (Some(newest), Some(oldest)) = (entries.first(), entries.last()) else {
        return TrendSummary::default();
    };

    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for entry in entries {
        let percentage = entry.percentage();
        sum += percentage;
        min = min.min(percentage);
        max = max.max(percentage);
    }

    let newest_pct = newest.percentage();
    let oldest_pct = oldest.percentage();
    let current_trend = if newest_pct > oldest_pct {
        TrendDirection::Up
    } else if newest_pct < oldest_pct {
        TrendDirection::Down
    } else {
        TrendDirection::Stable
    };

    TrendSummary {
        total_entries: entries.len(),
        date_range: DateRange {
            start: oldest.timestamp,
            end: newest.timestamp,
        },
        average_coverage: sum / entries.len() as f64,
        min_coverage: min,
        max_coverage: max,
        current_trend,
        trend_strength: (newest_pct - oldest_pct).abs(),
        stability_score: STABILITY_SCORE,
    }
}

pub fn analyze_trend(entries: &[Entry], now: DateTime<Utc>) -> TrendAnalysis {
    TrendAnalysis {
        short_term: analyze_period(entries, SHORT_TERM_DAYS, now),
        medium_term: analyze_period(entries, MEDIUM_TERM_DAYS, now),
        long_term: analyze_period(entries, LONG_TERM_DAYS, now),
        volatility: calculate_volatility(entries),
        momentum: calculate_momentum(entries),
        prediction: generate_prediction(entries),
    }
}

pub fn analyze_period(entries: &[Entry], days: u32, now: DateTime<Utc>) -> PeriodAnalysis {
    let cutoff = window_cutoff(now, days);
    let window = entries
        .iter()
        .filter(|entry| entry.timestamp > cutoff)
        .collect::<Vec<_>>();

    let (Some(newest), Some(oldest)) = (window.first(), window.last()) else {
        return insufficient_period(days, 0);
    };
    if window.len() < 2 {
        return insufficient_period(days, window.len());
    }

    let start_coverage = oldest.percentage();
    let end_coverage = newest.percentage();
    let change = end_coverage - start_coverage;
    let change_percent = if start_coverage == 0.0 {
        0.0
    } else {
        change / start_coverage * 100.0
    };

    PeriodAnalysis {
        period: period_label(days),
        days,
        start_coverage,
        end_coverage,
        change,
        change_percent,
        direction: direction_from_change(change),
        data_points: window.len(),
        confidence: PERIOD_CONFIDENCE,
    }
}

/// Start of a `days` look-back window. Windows reaching past the representable
/// time range start at [`DateTime::<Utc>::MIN_UTC`] and include everything.
pub fn window_cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    Duration::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Population variance of the coverage percentages.
pub fn calculate_volatility(entries: &[Entry]) -> f64 {
    if entries.len() < 2 {
        return 0.0;
    }

    let first = entries[0].percentage();
    if entries.iter().all(|entry| entry.percentage() == first) {
        return 0.0;
    }

    let count = entries.len() as f64;
    let mean = entries.iter().map(Entry::percentage).sum::<f64>() / count;
    entries
        .iter()
        .map(|entry| {
            let deviation = entry.percentage() - mean;
            deviation * deviation
        })
        .sum::<f64>()
        / count
}

/// Change over the recent half minus change over the older half.
pub fn calculate_momentum(entries: &[Entry]) -> f64 {
    if entries.len() < 3 {
        return 0.0;
    }

    let recent = entries[0].percentage();
    let middle = entries[entries.len() / 2].percentage();
    let old = entries[entries.len() - 1].percentage();

    (recent - middle) - (middle - old)
}

pub(crate) fn direction_from_change(change: f64) -> TrendDirection {
    if change > DIRECTION_THRESHOLD {
        TrendDirection::Up
    } else if change < -DIRECTION_THRESHOLD {
        TrendDirection::Down
    } else {
        TrendDirection::Stable
    }
}

fn insufficient_period(days: u32, data_points: usize) -> PeriodAnalysis {
    PeriodAnalysis {
        period: period_label(days),
        days,
        data_points,
        confidence: 0.0,
        ..PeriodAnalysis::default()
    }
}

fn period_label(days: u32) -> String {
    format!("{days}d")
}
