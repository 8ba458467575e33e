//! OpenAI-compatible `/v1/chat/completions` client (vLLM, llama.cpp).

use std::time::Duration;

use probe_config::SamplingConfig;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{BackendError, Completion, InferenceBackend, TokenLogprob};
use crate::prompt::{ChatMessage, ChatPrompt};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    logprobs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_logprobs: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
    #[serde(default)]
    logprobs: Option<ChoiceLogprobs>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceLogprobs {
    #[serde(default)]
    content: Vec<TokenLogprob>,
}

/// Sends one chat request per prompt to an inference server.
pub struct HttpBackend {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, BackendError> {
        let base_url = base_url.into();
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BackendError::Connection(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }

    fn complete(
        &self,
        prompt: &ChatPrompt,
        sampling: &SamplingConfig,
    ) -> Result<Completion, BackendError> {
        let request = ChatRequest {
            model: &self.model,
            messages: &prompt.messages,
            max_tokens: sampling.max_tokens,
            top_p: sampling.top_p,
            temperature: sampling.temperature,
            logprobs: sampling.logprobs.is_some(),
            top_logprobs: sampling.logprobs,
        };

        let mut req_builder = self.client.post(&self.url).json(&request);
        if let Some(ref key) = self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = req_builder
            .send()
            .map_err(|e| BackendError::Connection(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(BackendError::Status {
                status,
                url: self.url.clone(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| BackendError::Format(format!("failed to parse chat response: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Format("response has no choices".into()))?;

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            logprobs: choice.logprobs.map(|l| l.content),
        })
    }
}

impl InferenceBackend for HttpBackend {
    fn infer(
        &mut self,
        prompts: &[ChatPrompt],
        sampling: &SamplingConfig,
    ) -> Result<Vec<Completion>, BackendError> {
        prompts
            .iter()
            .map(|prompt| self.complete(prompt, sampling))
            .collect()
    }
}
