use std::path::PathBuf;

use chrono::{DateTime, Utc};
use covtrend_config::HistoryConfig;

use crate::store::StoredEntry;
use crate::trend::window_cutoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub max_entries: usize,
}

impl From<&HistoryConfig> for RetentionPolicy {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            retention_days: config.retention_days,
            max_entries: config.max_entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetentionPlan {
    pub keep: Vec<PathBuf>,
    pub drop: Vec<PathBuf>,
}

impl RetentionPlan {
    pub fn is_noop(&self) -> bool {
        self.drop.is_empty()
    }
}

/// Splits newest-first entries into keep and drop sets.
///
/// An entry is kept only when it is newer than the cutoff and still among the
/// first `max_entries` kept entries; age and count limits apply jointly.
pub fn plan_retention(
    entries: &[StoredEntry],
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> RetentionPlan {
    let cutoff = window_cutoff(now, policy.retention_days);
    let mut plan = RetentionPlan::default();

    for stored in entries {
        if stored.entry.timestamp > cutoff && plan.keep.len() < policy.max_entries {
            plan.keep.push(stored.path.clone());
        } else {
            plan.drop.push(stored.path.clone());
        }
    }

    plan
}
