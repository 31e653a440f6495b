//! Sample discovery
//!
//! Walks a samples root and yields the files accepted by an extension filter.

mod scanner;

pub use scanner::{SampleRecord, Scan, Scanner};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A directory or entry the scanner had to skip
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("file name is not valid UTF-8: {}", path.display())]
    NonUtf8Path { path: PathBuf },

    #[error("walk error: {0}")]
    Walk(#[source] walkdir::Error),
}

impl ScanError {
    /// Entry the error is about, if known
    pub fn path(&self) -> Option<&Path> {
        match self {
            ScanError::Unreadable { path, .. } | ScanError::NonUtf8Path { path } => Some(path),
            ScanError::Walk(_) => None,
        }
    }
}

impl From<walkdir::Error> for ScanError {
    fn from(err: walkdir::Error) -> Self {
        match err.path() {
            Some(path) => ScanError::Unreadable {
                path: path.to_path_buf(),
                source: err,
            },
            None => ScanError::Walk(err),
        }
    }
}

/// Accepted file extensions, stored lowercase without the leading dot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionFilter {
    accepted: BTreeSet<String>,
}

impl ExtensionFilter {
    /// Build a filter; entries like ".WAV" are normalized to "wav"
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let accepted = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { accepted }
    }

    /// Filter that accepts every file
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Whether `path` should be indexed.
    ///
    /// With a non-empty filter, files without an extension are rejected.
    pub fn accepts(&self, path: &Path) -> bool {
        if self.accepted.is_empty() {
            return true;
        }

        match path.extension() {
            Some(ext) => self.accepted.contains(&ext.to_string_lossy().to_lowercase()),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.accepted.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_extension_case_insensitively() {
        let filter = ExtensionFilter::new(["wav"]);

        assert!(filter.accepts(Path::new("/s/a.wav")));
        assert!(filter.accepts(Path::new("/s/b.WAV")));
        assert!(!filter.accepts(Path::new("/s/c.txt")));
        assert!(!filter.accepts(Path::new("/s/d")));
    }

    #[test]
    fn normalizes_configured_extensions() {
        let filter = ExtensionFilter::new([".FLAC", " aif ", "", "."]);
        let exts: Vec<&str> = filter.extensions().collect();
        assert_eq!(exts, vec!["aif", "flac"]);
    }

    #[test]
    fn empty_filter_accepts_everything() {
        let filter = ExtensionFilter::accept_all();
        assert!(filter.is_empty());
        assert!(filter.accepts(Path::new("README")));
        assert!(filter.accepts(Path::new("notes.txt")));
    }

    #[test]
    fn dotfile_has_no_extension() {
        let filter = ExtensionFilter::new(["wav"]);
        assert!(!filter.accepts(Path::new("/s/.wav")));
    }
}
