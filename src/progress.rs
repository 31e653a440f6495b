//! Rebuild progress reporting for the command line.
//!
//! Progress goes to stderr so stdout stays parseable for scripts.

use samplexplore_core::RebuildProgress;
use std::io::{IsTerminal, Write};

/// How rebuild progress is shown
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    /// One line per directory: "scan  12 dirs  340 / 1,020 files  /path"
    Human,
    /// One JSON object per line
    Json,
}

impl ProgressMode {
    /// JSON when asked for, otherwise human output if stderr is a terminal
    pub fn detect(json: bool, quiet: bool) -> Self {
        if quiet {
            ProgressMode::Off
        } else if json {
            ProgressMode::Json
        } else if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn report(&self, progress: &RebuildProgress) {
        if let Some(line) = self.render(progress) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }

    fn render(&self, progress: &RebuildProgress) -> Option<String> {
        match self {
            ProgressMode::Off => None,
            ProgressMode::Human => Some(match &progress.error {
                Some(error) => format!("skip  {}  {}", progress.current_directory, error),
                None => format!(
                    "scan  {} dirs  {} / {} files  {}",
                    format_number(progress.dirs_seen_total),
                    format_number(progress.files_accepted_total),
                    format_number(progress.files_seen_total),
                    progress.current_directory
                ),
            }),
            ProgressMode::Json => {
                let obj = serde_json::json!({
                    "event": "progress",
                    "files_seen_total": progress.files_seen_total,
                    "files_accepted_total": progress.files_accepted_total,
                    "dirs_seen_total": progress.dirs_seen_total,
                    "current_directory": progress.current_directory,
                    "error": progress.error,
                });
                serde_json::to_string(&obj).ok()
            }
        }
    }
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut result = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}
