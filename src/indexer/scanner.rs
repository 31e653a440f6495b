//! Directory scanner for index rebuilds

use samplexplore_core::RebuildProgress;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::{ExtensionFilter, ScanError};

/// A file accepted for indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub full_path: String,
    pub filename: String,
}

/// Walks a samples root
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    filter: ExtensionFilter,
    skip_hidden: bool,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, filter: ExtensionFilter) -> Self {
        Self {
            root: root.into(),
            filter,
            skip_hidden: false,
        }
    }

    /// Prune entries whose name starts with a dot
    pub fn skip_hidden(mut self, skip: bool) -> Self {
        self.skip_hidden = skip;
        self
    }

    /// Start the walk. Nothing touches the filesystem until the returned
    /// iterator is polled; `on_progress` fires once per directory.
    pub fn scan<F>(self, on_progress: F) -> Scan<F>
    where
        F: FnMut(&RebuildProgress),
    {
        // Files sort before directories so a directory's own files are all
        // yielded before the walk descends into its children.
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by(files_first)
            .into_iter();

        Scan {
            walker,
            filter: self.filter,
            skip_hidden: self.skip_hidden,
            current: None,
            totals: Totals::default(),
            on_progress,
        }
    }

    /// Walk without progress reporting
    pub fn records(self) -> Scan<impl FnMut(&RebuildProgress)> {
        self.scan(|_| {})
    }
}

fn files_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    files_seen: u64,
    files_accepted: u64,
    dirs_seen: u64,
}

#[derive(Debug)]
struct OpenDir {
    path: PathBuf,
    depth: usize,
}

/// Lazy, single-pass sequence of accepted files
pub struct Scan<F> {
    walker: walkdir::IntoIter,
    filter: ExtensionFilter,
    skip_hidden: bool,
    /// Directory whose immediate files are being enumerated
    current: Option<OpenDir>,
    totals: Totals,
    on_progress: F,
}

impl<F> Scan<F>
where
    F: FnMut(&RebuildProgress),
{
    fn emit(&mut self, directory: &Path, error: Option<String>) {
        let progress = RebuildProgress {
            files_seen_total: self.totals.files_seen,
            files_accepted_total: self.totals.files_accepted,
            dirs_seen_total: self.totals.dirs_seen,
            current_directory: directory.to_string_lossy().to_string(),
            error,
        };
        (self.on_progress)(&progress);
    }

    /// Close the open directory, if any, and report it
    fn finish_directory(&mut self, error: Option<String>) {
        if let Some(dir) = self.current.take() {
            self.totals.dirs_seen += 1;
            debug!(
                "Scanned {:?} ({} files seen so far)",
                dir.path, self.totals.files_seen
            );
            self.emit(&dir.path, error);
        }
    }

    fn handle_error(&mut self, err: ScanError) {
        let message = err.to_string();
        warn!("Skipping during scan: {}", message);
        self.skip(err.path().map(Path::to_path_buf), message);
    }

    /// Report a skipped entry. An unreadable open directory is closed with
    /// the error; anything else is reported against the open directory.
    fn skip(&mut self, path: Option<PathBuf>, message: String) {
        let is_current = matches!(
            (&self.current, &path),
            (Some(dir), Some(path)) if dir.path == *path
        );

        if is_current {
            self.finish_directory(Some(message));
        } else {
            let location = self
                .current
                .as_ref()
                .map(|dir| dir.path.clone())
                .or(path)
                .unwrap_or_default();
            self.emit(&location, Some(message));
        }
    }
}

impl<F> Iterator for Scan<F>
where
    F: FnMut(&RebuildProgress),
{
    type Item = SampleRecord;

    fn next(&mut self) -> Option<SampleRecord> {
        loop {
            let entry = match self.walker.next() {
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    self.handle_error(ScanError::from(err));
                    continue;
                }
                None => {
                    self.finish_directory(None);
                    return None;
                }
            };

            if self.skip_hidden && entry.depth() > 0 && is_hidden(&entry) {
                if entry.file_type().is_dir() {
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if entry.file_type().is_dir() {
                self.finish_directory(None);
                self.current = Some(OpenDir {
                    path: entry.path().to_path_buf(),
                    depth: entry.depth(),
                });
                continue;
            }

            let in_current = self
                .current
                .as_ref()
                .is_some_and(|dir| entry.depth() == dir.depth + 1);
            if !in_current {
                self.finish_directory(None);
            }

            self.totals.files_seen += 1;
            if !self.filter.accepts(entry.path()) {
                continue;
            }

            // Stored paths must round-trip to the real file
            let (Some(full_path), Some(filename)) =
                (entry.path().to_str(), entry.file_name().to_str())
            else {
                self.handle_error(ScanError::NonUtf8Path {
                    path: entry.path().to_path_buf(),
                });
                continue;
            };

            self.totals.files_accepted += 1;
            return Some(SampleRecord {
                full_path: full_path.to_string(),
                filename: filename.to_string(),
            });
        }
    }
}
