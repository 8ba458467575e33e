//! Triples files: one JSON object per line.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use probe_config::FrequencySetting;

use crate::WorkItem;

/// Load every work item from a JSON-lines triples file.
///
/// Blank lines are ignored. Name variants must be JSON arrays of strings.
pub fn load_triples(path: impl AsRef<Path>) -> Result<Vec<WorkItem>, DataError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| DataError::Io(path.to_path_buf(), e))?;
    let reader = BufReader::new(file);

    let mut items = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| DataError::Io(path.to_path_buf(), e))?;
        if line.trim().is_empty() {
            continue;
        }
        let item: WorkItem = serde_json::from_str(&line).map_err(|e| DataError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            message: e.to_string(),
        })?;
        items.push(item);
    }

    tracing::debug!(path = %path.display(), items = items.len(), "loaded triples");
    Ok(items)
}

/// Items belonging to a frequency slice, in dataset order.
#[must_use]
pub fn select(
    items: &[WorkItem],
    setting: FrequencySetting,
    count_high: u64,
    count_low: u64,
) -> Vec<WorkItem> {
    items
        .iter()
        .filter(|item| match setting {
            FrequencySetting::HighToLow => {
                item.subject_count >= count_high && item.object_count <= count_low
            }
            FrequencySetting::LowToHigh => {
                item.subject_count <= count_low && item.object_count >= count_high
            }
            FrequencySetting::All => true,
        })
        .cloned()
        .collect()
}

/// Errors that can occur when loading a dataset.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("failed to read dataset {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse {path} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
}
