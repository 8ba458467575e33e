//! Subprocess execution for probe jobs.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::Command,
    task::JoinHandle,
};

use crate::{device::Device, plan::Job, state::now_timestamp};

/// Lines of stderr kept for the failure record.
const STDERR_TAIL: usize = 20;

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub success: bool,
    /// Exit code if available.
    pub exit_code: Option<i32>,
    /// Error message if failed.
    pub error: Option<String>,
}

impl AttemptOutcome {
    #[must_use]
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(exit_code: Option<i32>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            error: Some(error.into()),
        }
    }
}

/// Runs one attempt of a job confined to one device.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job, device: &Device) -> Result<AttemptOutcome, RunError>;
}

/// Runs jobs as child processes with `CUDA_VISIBLE_DEVICES` set.
pub struct ProcessRunner {
    log_dir: PathBuf,
    /// `RUST_LOG` value for child processes.
    rust_log: Option<String>,
}

impl ProcessRunner {
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>, rust_log: Option<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            rust_log,
        }
    }

    /// Find the probe binary.
    #[must_use]
    pub fn find_probe_binary() -> Option<String> {
        let candidates = ["./target/release/probe", "./target/debug/probe"];

        for candidate in candidates {
            if Path::new(candidate).exists() {
                return Some(candidate.to_string());
            }
        }

        if let Ok(output) = std::process::Command::new("which").arg("probe").output()
            && output.status.success()
        {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return Some(path);
            }
        }

        None
    }

    /// Directory holding `stdout.log` and `stderr.log` for a job.
    #[must_use]
    pub fn job_log_dir(&self, job: &Job) -> PathBuf {
        self.log_dir.join(job.log_name())
    }
}

#[async_trait]
impl JobRunner for ProcessRunner {
    async fn run(&self, job: &Job, device: &Device) -> Result<AttemptOutcome, RunError> {
        let log_dir = self.job_log_dir(job);
        tokio::fs::create_dir_all(&log_dir)
            .await
            .map_err(|e| RunError::Logs(log_dir.clone(), e))?;

        tracing::debug!(
            "Spawning: CUDA_VISIBLE_DEVICES={} {}",
            device.index,
            job.command_line()
        );

        let mut cmd = Command::new(&job.program);
        cmd.args(&job.args)
            .env("CUDA_VISIBLE_DEVICES", device.index.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref rust_log) = self.rust_log {
            cmd.env("RUST_LOG", rust_log);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| RunError::Spawn(job.label.clone(), e))?;

        let timestamp = now_timestamp();
        let stdout_task = child
            .stdout
            .take()
            .map(|out| stream_to_file(out, log_dir.join("stdout.log"), timestamp.clone(), 0));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| stream_to_file(err, log_dir.join("stderr.log"), timestamp, STDERR_TAIL));

        let status = child.wait().await;

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        let stderr_tail = match stderr_task {
            Some(task) => task.await.ok(),
            None => None,
        };

        Ok(match status {
            Ok(status) if status.success() => AttemptOutcome::succeeded(),
            Ok(status) => {
                let error = match stderr_tail {
                    Some(lines) if !lines.is_empty() => lines.join("\n"),
                    _ => format!("Exit code: {:?}", status.code()),
                };
                AttemptOutcome::failed(status.code(), error)
            }
            Err(e) => AttemptOutcome::failed(None, format!("Process error: {e}")),
        })
    }
}

/// Append a child stream to a log file, returning the last `tail` lines.
///
/// A non-empty log gets a retry separator first.
fn stream_to_file<R>(
    reader: R,
    path: PathBuf,
    timestamp: String,
    tail: usize,
) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .ok();

        if let Some(ref mut f) = file
            && f.metadata().await.is_ok_and(|m| m.len() > 0)
        {
            let _ = f
                .write_all(format!("\n--- retry at {timestamp} ---\n\n").as_bytes())
                .await;
        }

        let mut kept = VecDeque::with_capacity(tail);
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(ref mut f) = file {
                let _ = f.write_all(line.as_bytes()).await;
                let _ = f.write_all(b"\n").await;
            }
            if tail > 0 {
                if kept.len() >= tail {
                    kept.pop_front();
                }
                kept.push_back(line);
            }
        }
        if let Some(ref mut f) = file {
            let _ = f.flush().await;
        }
        kept.into_iter().collect()
    })
}

/// Errors that keep an attempt from running at all.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn process for {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("failed to create log directory {path}: {1}", path = .0.display())]
    Logs(PathBuf, std::io::Error),
}

#[cfg(all(test, unix))]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn device(index: u32) -> Device {
        Device {
            index,
            memory_used_mib: 0,
            memory_free_mib: 80_000,
        }
    }

    fn shell(label: &str, script: &str) -> Job {
        Job::new(label, "sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn test_child_sees_only_its_device() {
        let dir = tempdir().unwrap();
        let runner = ProcessRunner::new(dir.path(), None);
        let job = shell("env/check", r#"echo "gpu=$CUDA_VISIBLE_DEVICES""#);

        let outcome = runner.run(&job, &device(3)).await.unwrap();
        assert!(outcome.success);

        let stdout = std::fs::read_to_string(runner.job_log_dir(&job).join("stdout.log")).unwrap();
        assert_eq!(stdout, "gpu=3\n");
    }

    #[tokio::test]
    async fn test_failure_carries_stderr_tail() {
        let dir = tempdir().unwrap();
        let runner = ProcessRunner::new(dir.path(), None);
        let job = shell(
            "fails",
            "for i in $(seq 1 30); do echo \"line $i\" >&2; done; exit 7",
        );

        let outcome = runner.run(&job, &device(0)).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(7));
        let error = outcome.error.unwrap();
        assert_eq!(error.lines().count(), STDERR_TAIL);
        assert!(error.starts_with("line 11\n"));
        assert!(error.ends_with("line 30"));
    }

    #[tokio::test]
    async fn test_retry_separator_in_logs() {
        let dir = tempdir().unwrap();
        let runner = ProcessRunner::new(dir.path(), None);
        let job = shell("twice", "echo attempt");

        runner.run(&job, &device(0)).await.unwrap();
        runner.run(&job.clone().retried(), &device(1)).await.unwrap();

        let stdout = std::fs::read_to_string(runner.job_log_dir(&job).join("stdout.log")).unwrap();
        assert_eq!(stdout.matches("attempt").count(), 2);
        assert!(stdout.contains("--- retry at "));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempdir().unwrap();
        let runner = ProcessRunner::new(dir.path(), None);
        let job = Job::new("missing", "/nonexistent/probe", Vec::new());
        let err = runner.run(&job, &device(0)).await.unwrap_err();
        assert!(matches!(err, RunError::Spawn(..)));
    }
}
