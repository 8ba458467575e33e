//! Checkpointed batch execution of one (relation, setting, template) job.

use std::path::PathBuf;

use probe_config::SamplingConfig;
use probe_data::WorkItem;

use crate::{
    backend::{BackendError, InferenceBackend, check_len},
    checkpoint::{BatchRange, CheckpointError, CheckpointKey, CheckpointStore, JobIdentity, partition},
    prober::Prober,
    reconcile::{IntegrityError, expected_keys, reconcile},
    result::ResultAccumulator,
};

/// What a call to [`BatchExecutor::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The final result file already existed.
    Skipped { path: PathBuf },
    Completed {
        /// Batches processed in this call.
        batches_run: usize,
        /// Batches taken from a checkpoint.
        batches_resumed: usize,
        path: PathBuf,
        /// Keys with at least one exact match, forward and backward.
        hits: (usize, usize),
    },
}

pub struct BatchExecutor<B> {
    backend: B,
    prober: Prober,
    store: CheckpointStore,
    sampling: SamplingConfig,
    batch_size: usize,
}

impl<B: InferenceBackend> BatchExecutor<B> {
    #[must_use]
    pub fn new(
        backend: B,
        prober: Prober,
        store: CheckpointStore,
        sampling: SamplingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            backend,
            prober,
            store,
            sampling,
            batch_size: batch_size.max(1),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Process `items` for `identity`, resuming from the newest checkpoint.
    ///
    /// Batches are processed in order. After each one the accumulator is saved
    /// and the previous batch's checkpoint is removed; failing to remove it
    /// only logs a warning. Once all keys are
    /// accounted for the final file is written and every checkpoint of this
    /// job is deleted.
    pub fn run(
        &mut self,
        identity: &JobIdentity,
        items: &[WorkItem],
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let final_key = CheckpointKey::final_result(identity);
        let final_path = self.store.path(&final_key);
        if final_path.exists() {
            tracing::info!(path = %final_path.display(), "final results exist, skipping");
            return Ok(ExecutionOutcome::Skipped { path: final_path });
        }

        let ranges = partition(items.len(), self.batch_size);
        let (mut acc, mut last_checkpoint, resume_from) = match self.store.latest(identity)? {
            Some((range, path, acc)) => {
                let Some(index) = ranges.iter().position(|r| *r == range) else {
                    return Err(ExecutorError::CheckpointMismatch {
                        path,
                        range,
                        items: items.len(),
                        batch_size: self.batch_size,
                    });
                };
                tracing::info!(
                    path = %path.display(),
                    "resuming from checkpoint, batches 0..={index} already done"
                );
                (acc, Some(path), index + 1)
            }
            None => (ResultAccumulator::default(), None, 0),
        };

        tracing::info!(
            job = %identity.stem(),
            items = items.len(),
            batches = ranges.len(),
            skipped = resume_from,
            "starting batches"
        );

        for (index, &range) in ranges.iter().enumerate().skip(resume_from) {
            let previous = index.checked_sub(1).map(|i| ranges[i]);
            match self.run_batch(identity, range, previous, &items[range.start..range.end], &mut acc) {
                Ok(path) => last_checkpoint = Some(path),
                Err(source) => {
                    match &last_checkpoint {
                        Some(path) => tracing::error!(
                            "batch {index} failed, last checkpoint: {}",
                            path.display()
                        ),
                        None => tracing::error!("batch {index} failed, no checkpoint saved yet"),
                    }
                    return Err(ExecutorError::Batch {
                        index,
                        range,
                        last_checkpoint,
                        source,
                    });
                }
            }
        }

        let expected = expected_keys(items);
        if let Err(e) = reconcile(&expected, &acc) {
            tracing::error!("{e}; checkpoints left in place");
            return Err(e.into());
        }

        let path = self.store.save(&final_key, &acc)?;
        let removed = self.store.remove_all(identity)?;
        tracing::debug!(removed, "cleaned up checkpoints");

        let hits = acc.hits();
        let prompts: usize = items.iter().map(WorkItem::variant_count).sum();
        tracing::info!(
            "[{}][{}] {}-{} / {} ({})",
            identity.template,
            identity.setting,
            hits.0,
            hits.1,
            items.len(),
            prompts
        );

        Ok(ExecutionOutcome::Completed {
            batches_run: ranges.len() - resume_from,
            batches_resumed: resume_from,
            path,
            hits,
        })
    }

    fn run_batch(
        &mut self,
        identity: &JobIdentity,
        range: BatchRange,
        previous: Option<BatchRange>,
        items: &[WorkItem],
        acc: &mut ResultAccumulator,
    ) -> Result<PathBuf, BatchError> {
        let prompts = self.prober.prompts(items);
        if let (Some(f), Some(b)) = (prompts.forward.first(), prompts.backward.first()) {
            tracing::debug!(forward = ?f.user_content(), backward = ?b.user_content(), "example prompts");
        }
        tracing::info!(
            start = range.start,
            end = range.end,
            prompts = prompts.len(),
            "processing batch"
        );

        let (forward, backward) = if prompts.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let forward = self.backend.infer(&prompts.forward, &self.sampling)?;
            check_len(prompts.len(), &forward)?;
            let backward = self.backend.infer(&prompts.backward, &self.sampling)?;
            check_len(prompts.len(), &backward)?;
            (forward, backward)
        };

        let (f, b) = self.prober.score(&prompts, &forward, &backward);
        acc.merge(f, b);

        let path = self.store.save(&CheckpointKey::batch(identity, range), acc)?;
        // A stale older checkpoint is never picked over `path` on resume.
        if let Some(previous) = previous
            && let Err(e) = self.store.remove(&CheckpointKey::batch(identity, previous))
        {
            tracing::warn!(saved = %path.display(), "could not remove previous checkpoint: {e}");
        }
        Ok(path)
    }
}

/// Failure inside a single batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("inference failed: {0}")]
    Backend(#[from] BackendError),
    #[error("checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("batch {index} [{}, {}) failed (last checkpoint: {last_checkpoint:?}): {source}", .range.start, .range.end)]
    Batch {
        index: usize,
        range: BatchRange,
        last_checkpoint: Option<PathBuf>,
        #[source]
        source: BatchError,
    },
    #[error(
        "checkpoint {} covers [{}, {}), which is not a batch of {items} items with batch size {batch_size}",
        .path.display(), .range.start, .range.end
    )]
    CheckpointMismatch {
        path: PathBuf,
        range: BatchRange,
        items: usize,
        batch_size: usize,
    },
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}
