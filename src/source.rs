//! Loading the exclusive item list and collection files from disk.
//!
//! Both files are line based: one identifier per line, surrounding
//! whitespace trimmed, blank lines and lines starting with `#` ignored.

use std::path::Path;

use tokio::fs;

use crate::config::{ExclusiveSourceConfig, MissingSourcePolicy};
use crate::error::{Result, SchedulerError};
use crate::scheduler::ExclusiveSet;

/// Read the exclusive item list once at session start.
///
/// # Errors
///
/// Returns `MissingExclusiveSource` when the file does not exist and the
/// policy is [`MissingSourcePolicy::Fail`], or `Io` if it cannot be read.
pub async fn load_exclusive_set(config: &ExclusiveSourceConfig) -> Result<ExclusiveSet> {
    if !config.path.exists() {
        return match config.missing {
            MissingSourcePolicy::Fail => {
                tracing::error!(path = %config.path.display(), "Exclusive item list not found");
                Err(SchedulerError::MissingExclusiveSource(config.path.clone()))
            }
            MissingSourcePolicy::Empty => {
                tracing::warn!(
                    path = %config.path.display(),
                    "Exclusive item list not found, continuing without exclusive items"
                );
                Ok(ExclusiveSet::empty())
            }
        };
    }

    let contents = fs::read_to_string(&config.path).await?;
    let set = ExclusiveSet::parse(&contents);
    tracing::info!(
        path = %config.path.display(),
        count = set.len(),
        "Loaded exclusive item list"
    );
    Ok(set)
}

/// Read a collection file: the ordered identifiers every worker enumerates.
pub async fn load_collection(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).await?;
    Ok(parse_lines(&contents).map(str::to_string).collect())
}

/// Meaningful lines of a line-based list file.
pub fn parse_lines(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}
