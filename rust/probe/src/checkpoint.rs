//! Checkpoint naming and persistence.
//!
//! A checkpoint is the serialized accumulator after a batch boundary. Files
//! are addressed by a structured [`CheckpointKey`]; a [`PathResolver`] maps
//! keys to paths and recognises checkpoint files when scanning.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use probe_config::{FrequencySetting, TemplateType};
use serde::{Deserialize, Serialize};

use crate::result::ResultAccumulator;

/// Half-open item range `[start, end)` covered by one batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchRange {
    pub start: usize,
    pub end: usize,
}

impl BatchRange {
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Split `items` into consecutive ranges of `batch_size`; the last may be shorter.
#[must_use]
pub fn partition(items: usize, batch_size: usize) -> Vec<BatchRange> {
    (0..items.div_ceil(batch_size))
        .map(|i| BatchRange {
            start: i * batch_size,
            end: ((i + 1) * batch_size).min(items),
        })
        .collect()
}

/// The combination a single executor run is responsible for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JobIdentity {
    pub relation: String,
    pub count_high: u64,
    pub count_low: u64,
    pub setting: FrequencySetting,
    pub template: TemplateType,
}

impl JobIdentity {
    /// Common file stem, `{relation}_{high}_{low}_{setting}_{template}`.
    #[must_use]
    pub fn stem(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.relation, self.count_high, self.count_low, self.setting, self.template
        )
    }
}

/// Address of a result file: a batch checkpoint, or the final file when
/// `range` is `None`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub identity: JobIdentity,
    pub range: Option<BatchRange>,
}

impl CheckpointKey {
    #[must_use]
    pub fn batch(identity: &JobIdentity, range: BatchRange) -> Self {
        Self {
            identity: identity.clone(),
            range: Some(range),
        }
    }

    #[must_use]
    pub fn final_result(identity: &JobIdentity) -> Self {
        Self {
            identity: identity.clone(),
            range: None,
        }
    }
}

/// Maps checkpoint keys to file locations.
pub trait PathResolver: Send + Sync {
    fn resolve(&self, key: &CheckpointKey) -> PathBuf;

    /// Directory scanned for checkpoints of `identity`.
    fn directory(&self, identity: &JobIdentity) -> PathBuf;

    /// Batch range encoded in `file_name`, if it is a checkpoint of `identity`.
    fn parse_checkpoint(&self, identity: &JobIdentity, file_name: &str) -> Option<BatchRange>;
}

/// All files of a job in one directory:
/// `{stem}.json` and `{stem}_incomplete_{start}_to_{end}.json`.
#[derive(Clone, Debug)]
pub struct FlatLayout {
    base: PathBuf,
}

impl FlatLayout {
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl PathResolver for FlatLayout {
    fn resolve(&self, key: &CheckpointKey) -> PathBuf {
        let stem = key.identity.stem();
        let name = match key.range {
            None => format!("{stem}.json"),
            Some(r) => format!("{stem}_incomplete_{}_to_{}.json", r.start, r.end),
        };
        self.base.join(name)
    }

    fn directory(&self, _identity: &JobIdentity) -> PathBuf {
        self.base.clone()
    }

    fn parse_checkpoint(&self, identity: &JobIdentity, file_name: &str) -> Option<BatchRange> {
        let rest = file_name
            .strip_prefix(&identity.stem())?
            .strip_prefix("_incomplete_")?
            .strip_suffix(".json")?;
        let (start, end) = rest.split_once("_to_")?;
        let range = BatchRange {
            start: start.parse().ok()?,
            end: end.parse().ok()?,
        };
        (range.end > range.start).then_some(range)
    }
}

/// Reads and writes result files through a [`PathResolver`].
pub struct CheckpointStore {
    resolver: Box<dyn PathResolver>,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(resolver: Box<dyn PathResolver>) -> Self {
        Self { resolver }
    }

    /// Store using [`FlatLayout`] under `base`.
    #[must_use]
    pub fn flat(base: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(FlatLayout::new(base)))
    }

    #[must_use]
    pub fn path(&self, key: &CheckpointKey) -> PathBuf {
        self.resolver.resolve(key)
    }

    #[must_use]
    pub fn exists(&self, key: &CheckpointKey) -> bool {
        self.path(key).exists()
    }

    /// Write `acc` to the file for `key`.
    pub fn save(
        &self,
        key: &CheckpointKey,
        acc: &ResultAccumulator,
    ) -> Result<PathBuf, CheckpointError> {
        let path = self.path(key);
        write_atomic(&path, acc)?;
        tracing::info!(path = %path.display(), "saved results");
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<ResultAccumulator, CheckpointError> {
        let file = File::open(path).map_err(|e| CheckpointError::Io(path.to_path_buf(), e))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| CheckpointError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// All checkpoint files of `identity`, ordered by ascending end index.
    pub fn scan(
        &self,
        identity: &JobIdentity,
    ) -> Result<Vec<(BatchRange, PathBuf)>, CheckpointError> {
        let dir = self.resolver.directory(identity);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::Io(dir, e)),
        };

        let mut found: Vec<(BatchRange, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .filter_map(|e| {
                let name = e.file_name();
                let range = self.resolver.parse_checkpoint(identity, name.to_str()?)?;
                Some((range, e.path()))
            })
            .collect();
        found.sort_by_key(|(range, _)| (range.end, range.start));
        Ok(found)
    }

    /// The loadable checkpoint with the highest end index.
    ///
    /// Unreadable checkpoints are skipped with a warning and the next-highest
    /// one is tried.
    pub fn latest(
        &self,
        identity: &JobIdentity,
    ) -> Result<Option<(BatchRange, PathBuf, ResultAccumulator)>, CheckpointError> {
        for (range, path) in self.scan(identity)?.into_iter().rev() {
            match self.load(&path) {
                Ok(acc) => return Ok(Some((range, path, acc))),
                Err(e) => tracing::warn!("skipping unreadable checkpoint: {e}"),
            }
        }
        Ok(None)
    }

    /// Delete one file; returns whether it existed.
    pub fn remove(&self, key: &CheckpointKey) -> Result<bool, CheckpointError> {
        let path = self.path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "removed checkpoint");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CheckpointError::Io(path, e)),
        }
    }

    /// Delete every checkpoint of `identity`; returns how many were removed.
    pub fn remove_all(&self, identity: &JobIdentity) -> Result<usize, CheckpointError> {
        let checkpoints = self.scan(identity)?;
        for (_, path) in &checkpoints {
            std::fs::remove_file(path).map_err(|e| CheckpointError::Io(path.clone(), e))?;
            tracing::info!(path = %path.display(), "removed checkpoint");
        }
        Ok(checkpoints.len())
    }
}

/// Write `acc` atomically: a temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, acc: &ResultAccumulator) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(parent.to_path_buf(), e))?;
    }

    let mut tmp = path.to_path_buf().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp).map_err(|e| CheckpointError::Io(tmp.clone(), e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, acc)
        .map_err(|e| CheckpointError::Write(tmp.clone(), e.to_string()))?;
    writer
        .flush()
        .map_err(|e| CheckpointError::Io(tmp.clone(), e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| CheckpointError::Io(tmp.clone(), e))?;
    drop(writer);

    std::fs::rename(&tmp, path).map_err(|e| CheckpointError::Io(path.to_path_buf(), e))
}

/// Errors that can occur when reading or writing result files.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("failed to read/write {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, String),
    #[error("failed to serialize {0}: {1}")]
    Write(PathBuf, String),
}
