use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Overall coverage for one run, as produced by the profile parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CoverageSnapshot {
    pub percentage: f64,
    pub total_lines: u64,
    pub covered_lines: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<String, PackageCoverage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PackageCoverage {
    pub name: String,
    pub percentage: f64,
    pub total_lines: u64,
    pub covered_lines: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, FileCoverage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FileCoverage {
    pub path: String,
    pub percentage: f64,
    pub total_lines: u64,
    pub covered_lines: u64,
}

impl CoverageSnapshot {
    pub fn from_counts(total_lines: u64, covered_lines: u64) -> Self {
        Self {
            percentage: percentage_of(covered_lines, total_lines),
            total_lines,
            covered_lines,
            packages: BTreeMap::new(),
        }
    }

    pub fn with_package(mut self, package: PackageCoverage) -> Self {
        self.packages.insert(package.name.clone(), package);
        self
    }

    pub fn files(&self) -> impl Iterator<Item = &FileCoverage> {
        self.packages
            .values()
            .flat_map(|package| package.files.values())
    }
}

impl PackageCoverage {
    pub fn from_counts(name: impl Into<String>, total_lines: u64, covered_lines: u64) -> Self {
        Self {
            name: name.into(),
            percentage: percentage_of(covered_lines, total_lines),
            total_lines,
            covered_lines,
            files: BTreeMap::new(),
        }
    }

    pub fn with_file(mut self, file: FileCoverage) -> Self {
        self.files.insert(normalize_path(&file.path), file);
        self
    }
}

impl FileCoverage {
    pub fn from_counts(path: &str, total_lines: u64, covered_lines: u64) -> Self {
        Self {
            path: normalize_path(path),
            percentage: percentage_of(covered_lines, total_lines),
            total_lines,
            covered_lines,
        }
    }

    /// Fingerprint of this file's coverage state, stable across runs with identical counts.
    pub fn fingerprint(&self) -> String {
        let material = format!(
            "{}:{}:{}",
            normalize_path(&self.path),
            self.covered_lines,
            self.total_lines
        );
        content_hash(&material)
    }
}

pub fn percentage_of(covered: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    covered as f64 * 100.0 / total as f64
}

pub fn content_hash(content: &str) -> String {
    blake3_hex(content.as_bytes())
}

pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

fn blake3_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_counts_computes_percentage_and_handles_empty_profiles() {
        let snapshot = CoverageSnapshot::from_counts(200, 150);
        assert_eq!(snapshot.percentage, 75.0);

        let empty = CoverageSnapshot::from_counts(0, 0);
        assert_eq!(empty.percentage, 0.0);
    }

    #[test]
    fn file_fingerprint_tracks_counts_and_normalizes_paths() {
        let a = FileCoverage::from_counts("src\\lib.rs", 10, 5);
        let b = FileCoverage::from_counts("src/lib.rs", 10, 5);
        let c = FileCoverage::from_counts("src/lib.rs", 10, 6);

        assert_eq!(a.path, "src/lib.rs");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn files_iterates_across_packages() {
        let snapshot = CoverageSnapshot::from_counts(30, 20)
            .with_package(
                PackageCoverage::from_counts("core", 10, 10)
                    .with_file(FileCoverage::from_counts("core/a.rs", 10, 10)),
            )
            .with_package(
                PackageCoverage::from_counts("cli", 20, 10)
                    .with_file(FileCoverage::from_counts("cli/main.rs", 12, 6))
                    .with_file(FileCoverage::from_counts("cli/args.rs", 8, 4)),
            );

        let mut paths = snapshot
            .files()
            .map(|file| file.path.as_str())
            .collect::<Vec<_>>();
        paths.sort();
        assert_eq!(paths, vec!["cli/args.rs", "cli/main.rs", "core/a.rs"]);
    }

    #[test]
    fn empty_packages_are_omitted_from_json() {
        let snapshot = CoverageSnapshot::from_counts(4, 3);
        let json = serde_json::to_string(&snapshot).expect("serialize snapshot");
        assert!(!json.contains("packages"));

        let parsed: CoverageSnapshot = serde_json::from_str(&json).expect("parse snapshot");
        assert_eq!(parsed, snapshot);
    }
}
