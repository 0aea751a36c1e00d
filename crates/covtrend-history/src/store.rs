use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::HistoryError;
use crate::cancel::CancelToken;
use crate::entry::Entry;
use crate::lock::{LockMode, StoreLock};
use crate::trend::window_cutoff;

const ENTRY_EXTENSION: &str = "json";
const TEMP_PREFIX: &str = ".covtrend-";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub path: PathBuf,
    pub entry: Entry,
}

/// An entry file that could not be read or parsed and was left out of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Best-effort read: parsed entries newest first, plus whatever was skipped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadResult {
    pub entries: Vec<StoredEntry>,
    pub skipped: Vec<SkippedEntry>,
}

impl LoadResult {
    pub fn into_entries(self) -> Vec<Entry> {
        self.entries.into_iter().map(|stored| stored.entry).collect()
    }
}

/// One JSON file per entry in a single flat directory.
#[derive(Debug, Clone)]
pub struct EntryStore {
    dir: PathBuf,
}

impl EntryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_storage_dir(&self) -> Result<(), HistoryError> {
        fs::create_dir_all(&self.dir).map_err(|source| {
            HistoryError::io(
                format!("failed to create storage directory {}", self.dir.display()),
                source,
            )
        })
    }

    pub fn lock(&self, mode: LockMode) -> Result<StoreLock, HistoryError> {
        self.ensure_storage_dir()?;
        StoreLock::acquire(&self.dir, mode)
    }

    /// Writes a new entry file through a uniquely named temp file. Existing files are
    /// never replaced: a name clash, including one with a concurrent writer, publishes
    /// under the next free `-N` suffix instead.
    pub fn save_entry(&self, cancel: &CancelToken, entry: &Entry) -> Result<PathBuf, HistoryError> {
        cancel.check()?;
        self.ensure_storage_dir()?;

        let content = serde_json::to_vec_pretty(entry)?;
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|source| {
                HistoryError::io(
                    format!("failed to create temp file in {}", self.dir.display()),
                    source,
                )
            })?;
        temp.write_all(&content)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|source| {
                HistoryError::io(
                    format!("failed to write entry file {}", temp.path().display()),
                    source,
                )
            })?;

        let file_name = entry.file_name();
        let mut counter = 0;
        loop {
            let path = self.entry_path(&file_name, counter);
            match temp.persist_noclobber(&path) {
                Ok(_) => {
                    tracing::debug!(path = %path.display(), branch = %entry.branch, "saved coverage entry");
                    return Ok(path);
                }
                Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                    temp = err.file;
                    counter += 1;
                }
                Err(err) => {
                    return Err(HistoryError::io(
                        format!("failed to move entry into place at {}", path.display()),
                        err.error,
                    ));
                }
            }
        }
    }

    pub fn load_all_entries(&self, cancel: &CancelToken) -> Result<LoadResult, HistoryError> {
        cancel.check()?;
        self.ensure_storage_dir()?;

        let mut result = LoadResult::default();
        for path in self.entry_files()? {
            cancel.check()?;
            match read_entry(&path) {
                Ok(entry) => result.entries.push(StoredEntry { path, entry }),
                Err(reason) => {
                    tracing::warn!(
                        path = %path.display(),
                        reason = %reason,
                        "skipping unreadable coverage entry"
                    );
                    result.skipped.push(SkippedEntry { path, reason });
                }
            }
        }

        sort_newest_first(&mut result.entries);
        Ok(result)
    }

    /// Entries on `branch` newer than `now - days`, newest first, at most `max_points`.
    pub fn load_entries(
        &self,
        cancel: &CancelToken,
        branch: &str,
        days: u32,
        max_points: usize,
        now: DateTime<Utc>,
    ) -> Result<LoadResult, HistoryError> {
        let cutoff = window_cutoff(now, days);
        let mut result = self.load_all_entries(cancel)?;
        result
            .entries
            .retain(|stored| stored.entry.branch == branch && stored.entry.timestamp > cutoff);
        result.entries.truncate(max_points);
        Ok(result)
    }

    /// Deletes exactly the given entry files; files already gone are not an error.
    pub fn remove_entries(
        &self,
        cancel: &CancelToken,
        paths: &[PathBuf],
    ) -> Result<usize, HistoryError> {
        let mut removed = 0;
        for path in paths {
            cancel.check()?;
            match fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "entry already removed");
                }
                Err(source) => {
                    return Err(HistoryError::io(
                        format!("failed to remove entry file {}", path.display()),
                        source,
                    ));
                }
            }
        }
        Ok(removed)
    }

    /// Total size in bytes of all entry files, corrupt ones included.
    pub fn storage_size(&self, cancel: &CancelToken) -> Result<u64, HistoryError> {
        cancel.check()?;
        let mut total = 0;
        for path in self.entry_files()? {
            cancel.check()?;
            let metadata = fs::metadata(&path).map_err(|source| {
                HistoryError::io(format!("failed to stat {}", path.display()), source)
            })?;
            total += metadata.len();
        }
        Ok(total)
    }

    /// Deletes temp files left behind by writers that died before publishing,
    /// once they are older than `grace`.
    pub fn remove_stale_temp_files(
        &self,
        cancel: &CancelToken,
        grace: Duration,
        now: SystemTime,
    ) -> Result<Vec<PathBuf>, HistoryError> {
        cancel.check()?;
        let mut removed = Vec::new();
        for path in self.list_dir()? {
            cancel.check()?;
            if !is_temp_file(&path) {
                continue;
            }
            let modified = match fs::metadata(&path).and_then(|metadata| metadata.modified()) {
                Ok(modified) => modified,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(HistoryError::io(
                        format!("failed to stat {}", path.display()),
                        source,
                    ));
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < grace {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::warn!(path = %path.display(), age_secs = age.as_secs(), "removed stale temp file");
                    removed.push(path);
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(HistoryError::io(
                        format!("failed to remove temp file {}", path.display()),
                        source,
                    ));
                }
            }
        }
        Ok(removed)
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, HistoryError> {
        let mut files = self.list_dir()?;
        files.retain(|path| is_entry_file(path));
        Ok(files)
    }

    fn list_dir(&self) -> Result<Vec<PathBuf>, HistoryError> {
        let read_dir = fs::read_dir(&self.dir).map_err(|source| {
            HistoryError::io(
                format!("failed to list storage directory {}", self.dir.display()),
                source,
            )
        })?;

        let mut paths = Vec::new();
        for item in read_dir {
            let item = item.map_err(|source| {
                HistoryError::io(
                    format!("failed to list storage directory {}", self.dir.display()),
                    source,
                )
            })?;
            paths.push(item.path());
        }
        paths.sort();
        Ok(paths)
    }

    fn entry_path(&self, file_name: &str, counter: usize) -> PathBuf {
        if counter == 0 {
            return self.dir.join(file_name);
        }
        let stem = file_name
            .strip_suffix(&format!(".{ENTRY_EXTENSION}"))
            .unwrap_or(file_name);
        self.dir.join(format!("{stem}-{counter}.{ENTRY_EXTENSION}"))
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') && name.ends_with(TEMP_SUFFIX))
        && path.is_file()
}

fn is_entry_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_none_or(|name| name.starts_with('.'));
    !hidden
        && path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION)
        && path.is_file()
}

fn read_entry(path: &Path) -> Result<Entry, String> {
    let raw = fs::read(path).map_err(|err| format!("read failed: {err}"))?;
    serde_json::from_slice(&raw).map_err(|err| format!("invalid entry JSON: {err}"))
}

fn sort_newest_first(entries: &mut [StoredEntry]) {
    entries.sort_by(|a, b| {
        b.entry
            .timestamp
            .cmp(&a.entry.timestamp)
            .then_with(|| b.path.cmp(&a.path))
    });
}
