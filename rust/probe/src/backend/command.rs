//! Backend that delegates to an external program.
//!
//! The program receives one JSON request on stdin:
//! `{"model": ..., "sampling": {...}, "prompts": [[{"role": ..., "content": ...}, ...], ...]}`
//! and must print `{"completions": [{"text": ..., "logprobs": [...]}, ...]}` on stdout.

use std::{
    io::Write,
    process::{Command, Stdio},
};

use probe_config::SamplingConfig;
use serde::{Deserialize, Serialize};

use super::{BackendError, Completion, InferenceBackend, check_len};
use crate::prompt::ChatPrompt;

#[derive(Serialize)]
struct CommandRequest<'a> {
    model: &'a str,
    sampling: &'a SamplingConfig,
    prompts: &'a [ChatPrompt],
}

#[derive(Deserialize)]
struct CommandResponse {
    completions: Vec<Completion>,
}

pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    model: String,
}

impl CommandBackend {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, model: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            model: model.into(),
        }
    }
}

impl InferenceBackend for CommandBackend {
    fn infer(
        &mut self,
        prompts: &[ChatPrompt],
        sampling: &SamplingConfig,
    ) -> Result<Vec<Completion>, BackendError> {
        let request = serde_json::to_vec(&CommandRequest {
            model: &self.model,
            sampling,
            prompts,
        })
        .map_err(|e| BackendError::Format(e.to_string()))?;

        tracing::debug!(program = %self.program, prompts = prompts.len(), "invoking backend command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackendError::Spawn(self.program.clone(), e))?;

        // The child may fill its stdout pipe before it has read all of stdin.
        let stdin = child.stdin.take();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&request)?;
            }
            Ok(())
        });

        let output = child
            .wait_with_output()
            .map_err(|e| BackendError::Spawn(self.program.clone(), e))?;
        let write_result = writer
            .join()
            .map_err(|_| BackendError::Format("stdin writer panicked".into()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
            return Err(BackendError::Exit {
                code: output.status.code(),
                stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
            });
        }
        write_result.map_err(|e| BackendError::Spawn(self.program.clone(), e))?;

        let response: CommandResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| BackendError::Format(format!("failed to parse command output: {e}")))?;
        check_len(prompts.len(), &response.completions)?;
        Ok(response.completions)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandBackend {
        CommandBackend::new("sh", vec!["-c".into(), script.into()], "m")
    }

    #[test]
    fn test_reads_completions() {
        let mut backend = sh(
            r#"cat > /dev/null; echo '{"completions":[{"text":"Yes"},{"text":"No"}]}'"#,
        );
        let prompts = vec![ChatPrompt::with_system("s", "a"), ChatPrompt::with_system("s", "b")];
        let out = backend.infer(&prompts, &SamplingConfig::default()).unwrap();
        assert_eq!(out, vec![Completion::text("Yes"), Completion::text("No")]);
    }

    #[test]
    fn test_length_mismatch() {
        let mut backend = sh(r#"cat > /dev/null; echo '{"completions":[]}'"#);
        let prompts = vec![ChatPrompt::with_system("s", "a")];
        let err = backend.infer(&prompts, &SamplingConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            BackendError::LengthMismatch { expected: 1, got: 0 }
        ));
    }

    #[test]
    fn test_nonzero_exit_keeps_stderr() {
        let mut backend = sh("cat > /dev/null; echo 'CUDA out of memory' >&2; exit 3");
        let prompts = vec![ChatPrompt::with_system("s", "a")];
        let err = backend.infer(&prompts, &SamplingConfig::default()).unwrap_err();
        match err {
            BackendError::Exit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("out of memory"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
