use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::trend::calculate_momentum;

pub const MIN_PREDICTION_ENTRIES: usize = 5;
/// Fixed confidence of the momentum extrapolation.
pub const PREDICTION_CONFIDENCE: f64 = 65.0;

const PREDICTION_MODEL: &str = "linear_momentum";
const NEXT_WEEK_DAYS: u32 = 7;
const NEXT_MONTH_DAYS: u32 = 30;
const NEXT_WEEK_BAND: f64 = 2.0;
const NEXT_MONTH_BAND: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PredictionRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PredictionPoint {
    pub days_ahead: u32,
    pub percentage: f64,
    pub range: PredictionRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub next_week: PredictionPoint,
    pub next_month: PredictionPoint,
    pub confidence: f64,
    pub model: String,
}

/// Extrapolates `current + momentum * days`. `None` below [`MIN_PREDICTION_ENTRIES`].
pub fn generate_prediction(entries: &[Entry]) -> Option<Prediction> {
    if entries.len() < MIN_PREDICTION_ENTRIES {
        return None;
    }

    let current = entries[0].percentage();
    let momentum = calculate_momentum(entries);

    Some(Prediction {
        next_week: project(current, momentum, NEXT_WEEK_DAYS, NEXT_WEEK_BAND),
        next_month: project(current, momentum, NEXT_MONTH_DAYS, NEXT_MONTH_BAND),
        confidence: PREDICTION_CONFIDENCE,
        model: PREDICTION_MODEL.to_owned(),
    })
}

fn project(current: f64, momentum: f64, days: u32, band: f64) -> PredictionPoint {
    let percentage = current + momentum * f64::from(days);
    PredictionPoint {
        days_ahead: days,
        percentage,
        range: PredictionRange {
            min: (percentage - band).clamp(0.0, 100.0),
            max: (percentage + band).clamp(0.0, 100.0),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trend::tests::{daily_series, fixed_now};

    #[test]
    fn prediction_requires_five_entries() {
        let now = fixed_now();
        let four = daily_series(now, &[72.0, 71.5, 71.0, 70.5]);
        assert!(generate_prediction(&four).is_none());

        let five = daily_series(now, &[72.0, 71.5, 71.0, 70.75, 70.5]);
        assert!(generate_prediction(&five).is_some());
    }

    #[test]
    fn prediction_extrapolates_momentum() {
        let now = fixed_now();
        let entries = daily_series(now, &[72.0, 71.5, 71.0, 70.75, 70.5]);
        let momentum = calculate_momentum(&entries);
        assert_eq!(momentum, 0.5);

        let prediction = generate_prediction(&entries).expect("prediction");

        assert_eq!(prediction.next_week.percentage, 72.0 + momentum * 7.0);
        assert_eq!(prediction.next_week.days_ahead, 7);
        assert_eq!(prediction.next_week.range.min, 73.5);
        assert_eq!(prediction.next_week.range.max, 77.5);
        assert_eq!(prediction.next_month.percentage, 72.0 + momentum * 30.0);
        assert_eq!(prediction.next_month.range.min, 82.0);
        assert_eq!(prediction.next_month.range.max, 92.0);
        assert_eq!(prediction.confidence, PREDICTION_CONFIDENCE);
        assert_eq!(prediction.model, "linear_momentum");
    }

    #[test]
    fn prediction_ranges_stay_within_percent_bounds() {
        let now = fixed_now();
        let entries = daily_series(now, &[99.0, 95.0, 90.0, 89.0, 88.0]);

        let prediction = generate_prediction(&entries).expect("prediction");

        assert!(prediction.next_month.percentage > 100.0);
        assert_eq!(prediction.next_month.range.max, 100.0);
        assert_eq!(prediction.next_month.range.min, 100.0);
    }
}
