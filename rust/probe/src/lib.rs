#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

//! Probe executor
//!
//! Probes a model with forward and backward factual prompts over a dataset
//! slice, persisting results after every batch and resuming from the newest
//! checkpoint after a crash.

pub mod backend;
pub mod checkpoint;
pub mod executor;
pub mod judge;
pub mod prober;
pub mod prompt;
pub mod reconcile;
pub mod result;

pub use backend::{Completion, InferenceBackend};
pub use checkpoint::{BatchRange, CheckpointKey, CheckpointStore, JobIdentity, PathResolver};
pub use executor::{BatchExecutor, ExecutionOutcome, ExecutorError};
pub use prober::Prober;
pub use result::{ProbeResult, ResultAccumulator};
