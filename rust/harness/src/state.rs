//! Job ledger.
//!
//! Records the status of each job in a JSON file so `probe-harness status`
//! can report on a running or crashed harness. Completed work itself is
//! tracked by the probe checkpoints, not here.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter, Seek, SeekFrom},
    path::Path,
};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::plan::Job;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job has not started yet.
    Pending,
    /// An attempt is executing.
    Running,
    /// The last attempt failed and the job is queued again.
    Retrying,
    Succeeded,
    /// Failed on every allowed attempt.
    Failed,
    /// Was running when its harness died.
    Interrupted,
}

impl JobStatus {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Retrying => "RETRYING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Interrupted => "INTERRUPTED",
        }
    }
}

/// State of a single job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    /// Full command line.
    pub command: String,
    /// Attempts started so far.
    pub attempts: u32,
    /// Device of the latest attempt.
    pub device: Option<u32>,
    /// PID of the harness that owns the job while it runs.
    pub owner_pid: Option<u32>,
    /// Error messages from failed attempts.
    #[serde(default)]
    pub errors: Vec<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl JobState {
    /// Create a new pending job state.
    #[must_use]
    pub fn new(command: String) -> Self {
        Self {
            status: JobStatus::Pending,
            command,
            attempts: 0,
            device: None,
            owner_pid: None,
            errors: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Persistent state for all jobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarnessState {
    /// State of each job, keyed by job label.
    pub jobs: HashMap<String, JobState>,
    /// Version for future compatibility.
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

/// Manages state persistence with file locking.
pub struct StateManager {
    /// Path to the state file.
    pub path: std::path::PathBuf,
}

impl StateManager {
    /// Create a new state manager for the given path.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load state from file, or create empty state if file doesn't exist.
    pub fn load(&self) -> Result<HarnessState, StateError> {
        if !self.path.exists() {
            return Ok(HarnessState::default());
        }

        let file = File::open(&self.path).map_err(|e| StateError::Io(self.path.clone(), e))?;
        file.lock_shared()
            .map_err(|e| StateError::Lock(self.path.clone(), e))?;

        let reader = BufReader::new(&file);
        let state = serde_json::from_reader(reader)
            .map_err(|e| StateError::Parse(self.path.clone(), e.to_string()))?;

        file.unlock()
            .map_err(|e| StateError::Lock(self.path.clone(), e))?;

        Ok(state)
    }

    /// Update state atomically with a closure (holds lock for entire operation).
    pub fn update<F>(&self, f: F) -> Result<HarnessState, StateError>
    where
        F: FnOnce(&mut HarnessState),
    {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StateError::Io(parent.to_path_buf(), e))?;
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| StateError::Io(self.path.clone(), e))?;

        file.lock_exclusive()
            .map_err(|e| StateError::Lock(self.path.clone(), e))?;

        let mut state: HarnessState = if file.metadata().map(|m| m.len()).unwrap_or(0) > 0 {
            let reader = BufReader::new(&file);
            serde_json::from_reader(reader)
                .map_err(|e| StateError::Parse(self.path.clone(), e.to_string()))?
        } else {
            HarnessState::default()
        };

        f(&mut state);

        file.set_len(0)
            .map_err(|e| StateError::Io(self.path.clone(), e))?;
        (&file)
            .seek(SeekFrom::Start(0))
            .map_err(|e| StateError::Io(self.path.clone(), e))?;

        let writer = BufWriter::new(&file);
        serde_json::to_writer_pretty(writer, &state)
            .map_err(|e| StateError::Write(self.path.clone(), e.to_string()))?;

        file.unlock()
            .map_err(|e| StateError::Lock(self.path.clone(), e))?;

        Ok(state)
    }

    /// Start a fresh record for every planned job.
    pub fn initialize_jobs(&self, jobs: &[Job]) -> Result<HarnessState, StateError> {
        self.update(|state| {
            for job in jobs {
                state
                    .jobs
                    .insert(job.label.clone(), JobState::new(job.command_line()));
            }
        })
    }

    /// Mark an attempt as started on a device.
    pub fn mark_started(&self, label: &str, device: u32) -> Result<(), StateError> {
        self.update(|state| {
            if let Some(job) = state.jobs.get_mut(label) {
                job.status = JobStatus::Running;
                job.attempts += 1;
                job.device = Some(device);
                job.owner_pid = Some(std::process::id());
                job.started_at = Some(now_timestamp());
            }
        })?;
        Ok(())
    }

    /// Mark a failed attempt that will be retried.
    pub fn mark_retrying(&self, label: &str, error: &str) -> Result<(), StateError> {
        self.update(|state| {
            if let Some(job) = state.jobs.get_mut(label) {
                job.status = JobStatus::Retrying;
                job.errors.push(error.to_string());
            }
        })?;
        Ok(())
    }

    pub fn mark_succeeded(&self, label: &str) -> Result<(), StateError> {
        self.update(|state| {
            if let Some(job) = state.jobs.get_mut(label) {
                job.status = JobStatus::Succeeded;
                job.owner_pid = None;
                job.finished_at = Some(now_timestamp());
            }
        })?;
        Ok(())
    }

    /// Mark a job as permanently failed.
    pub fn mark_failed(&self, label: &str, error: &str) -> Result<(), StateError> {
        self.update(|state| {
            if let Some(job) = state.jobs.get_mut(label) {
                job.status = JobStatus::Failed;
                job.owner_pid = None;
                job.errors.push(error.to_string());
                job.finished_at = Some(now_timestamp());
            }
        })?;
        Ok(())
    }

    /// Detect jobs left non-terminal by a harness that is no longer alive.
    pub fn recover_interrupted(&self) -> Result<Vec<String>, StateError> {
        let mut interrupted = Vec::new();

        self.update(|state| {
            for (label, job) in &mut state.jobs {
                let active = matches!(job.status, JobStatus::Running | JobStatus::Retrying);
                if active && !job.owner_pid.is_some_and(is_process_alive) {
                    job.status = JobStatus::Interrupted;
                    job.owner_pid = None;
                    job.errors.push("Harness exited while job was active".to_string());
                    interrupted.push(label.clone());
                }
            }
        })?;

        interrupted.sort();
        Ok(interrupted)
    }
}

/// Check if a process is alive by PID.
fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: kill with signal 0 is safe and just checks process existence
        unsafe { libc::kill(pid, 0) == 0 }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Get current local time as a display string.
#[must_use]
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Errors that can occur with state management.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to read/write state file {0}: {1}")]
    Io(std::path::PathBuf, std::io::Error),
    #[error("failed to lock state file {0}: {1}")]
    Lock(std::path::PathBuf, std::io::Error),
    #[error("failed to parse state file {0}: {1}")]
    Parse(std::path::PathBuf, String),
    #[error("failed to write state file {0}: {1}")]
    Write(std::path::PathBuf, String),
}
