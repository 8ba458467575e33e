//! Inference backends.
//!
//! A backend turns a batch of chat prompts into exactly one completion per
//! prompt, in order. Any failure aborts the whole call.

mod command;
mod http;

pub use command::CommandBackend;
pub use http::HttpBackend;
use probe_config::{BackendConfig, SamplingConfig};
use serde::{Deserialize, Serialize};

use crate::prompt::ChatPrompt;

/// Log-probability of one generated token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
}

/// One generated completion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<TokenLogprob>>,
}

impl Completion {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            logprobs: None,
        }
    }
}

pub trait InferenceBackend {
    fn infer(
        &mut self,
        prompts: &[ChatPrompt],
        sampling: &SamplingConfig,
    ) -> Result<Vec<Completion>, BackendError>;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn infer(
        &mut self,
        prompts: &[ChatPrompt],
        sampling: &SamplingConfig,
    ) -> Result<Vec<Completion>, BackendError> {
        (**self).infer(prompts, sampling)
    }
}

/// Build the backend described by `config` for `model`.
pub fn from_config(
    config: &BackendConfig,
    model: &str,
) -> Result<Box<dyn InferenceBackend>, BackendError> {
    Ok(match config {
        BackendConfig::Http {
            url,
            api_key,
            timeout_secs,
        } => Box::new(HttpBackend::new(
            url.clone(),
            model,
            api_key.clone(),
            *timeout_secs,
        )?),
        BackendConfig::Command { program, args } => {
            Box::new(CommandBackend::new(program.clone(), args.clone(), model))
        }
    })
}

/// Fail unless a backend returned one completion per prompt.
pub fn check_len(expected: usize, completions: &[Completion]) -> Result<(), BackendError> {
    if completions.len() == expected {
        Ok(())
    } else {
        Err(BackendError::LengthMismatch {
            expected,
            got: completions.len(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("malformed backend response: {0}")]
    Format(String),
    #[error("backend returned {got} completions for {expected} prompts")]
    LengthMismatch { expected: usize, got: usize },
    #[error("failed to run backend command {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("backend command exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
}
