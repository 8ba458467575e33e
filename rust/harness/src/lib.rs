#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

//! Probe Harness
//!
//! Builds the job list for a set of relations, modes and models, then runs
//! every job on exactly one eligible GPU at a time, retrying failures after a
//! device reset.

pub mod config;
pub mod device;
pub mod dispatcher;
pub mod plan;
pub mod pool;
pub mod queue;
pub mod runner;
pub mod state;

pub use config::{HarnessConfig, ModelEntry};
pub use device::{Device, DeviceQuery, DeviceReset};
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use plan::{Job, JobPlan};
pub use pool::{DeviceLease, DevicePool};
pub use queue::JobQueue;
pub use runner::{AttemptOutcome, JobRunner, ProcessRunner};
pub use state::{JobState, JobStatus, StateManager};
