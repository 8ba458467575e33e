//! Forward/backward prompt expansion and scoring for a batch of items.

use std::ops::Range;

use probe_config::{ProbeConfig, TemplateType};
use probe_data::{PairKey, WorkItem};

use crate::{
    backend::Completion,
    prompt::{ChatPrompt, PromptError, PromptTemplate},
    result::{DirectionResults, ProbeResult},
};

/// Prompts for one batch, with the span of prompts each item expanded to.
#[derive(Debug, Default)]
pub struct BatchPrompts {
    pub forward: Vec<ChatPrompt>,
    pub backward: Vec<ChatPrompt>,
    spans: Vec<(PairKey, Range<usize>)>,
}

impl BatchPrompts {
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Number of items that produced at least one prompt.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.spans.len()
    }
}

pub struct Prober {
    forward: PromptTemplate,
    backward: PromptTemplate,
    relation_forward: String,
    relation_backward: String,
}

impl Prober {
    pub fn new(
        kind: TemplateType,
        template_forward: &str,
        template_backward: &str,
        relation_forward: impl Into<String>,
        relation_backward: impl Into<String>,
    ) -> Result<Self, PromptError> {
        Ok(Self {
            forward: PromptTemplate::new(kind, template_forward)?,
            backward: PromptTemplate::new(kind, template_backward)?,
            relation_forward: relation_forward.into(),
            relation_backward: relation_backward.into(),
        })
    }

    pub fn from_config(config: &ProbeConfig) -> Result<Self, PromptError> {
        Self::new(
            config.template_type,
            &config.template_forward,
            &config.template_backward,
            config.relation_forward.clone(),
            config.relation_backward.clone(),
        )
    }

    #[must_use]
    pub fn template(&self) -> TemplateType {
        self.forward.kind()
    }

    /// Expand every name variant of every item into a forward and a backward prompt.
    #[must_use]
    pub fn prompts(&self, items: &[WorkItem]) -> BatchPrompts {
        let mut batch = BatchPrompts::default();
        for item in items {
            let start = batch.forward.len();
            for (s, o) in item.expand() {
                batch
                    .forward
                    .push(self.forward.render(s, &self.relation_forward, o));
                batch
                    .backward
                    .push(self.backward.render(s, &self.relation_backward, o));
            }
            let end = batch.forward.len();
            if end > start {
                batch.spans.push((item.key(), start..end));
            }
        }
        batch
    }

    /// Score completions against the correct word, grouping them by key.
    ///
    /// Completions must be in prompt order. A key repeated within the batch
    /// keeps only its last item's results.
    #[must_use]
    pub fn score(
        &self,
        prompts: &BatchPrompts,
        forward: &[Completion],
        backward: &[Completion],
    ) -> (DirectionResults, DirectionResults) {
        let correct = self.template().correct_word();
        let collect = |completions: &[Completion]| {
            let mut out = DirectionResults::new();
            for (key, span) in &prompts.spans {
                let mut result = ProbeResult::default();
                for completion in &completions[span.clone()] {
                    result.record(&completion.text, correct);
                }
                out.insert(key.clone(), result);
            }
            out
        };
        (collect(forward), collect(backward))
    }
}
