//! Shared fixtures for executor integration tests.

#![allow(dead_code)]

use std::path::Path;

use probe_config::{FrequencySetting, SamplingConfig, TemplateType};
use probe_data::WorkItem;
use probe_exec::{
    BatchExecutor, CheckpointKey, CheckpointStore, Completion, InferenceBackend, JobIdentity,
    Prober, ResultAccumulator, backend::BackendError, prompt::ChatPrompt,
};

/// Deterministic backend: answers "Yes" when the user turn has an even
/// number of bytes. Records the prompt count of every call and can be told
/// to fail on a given (zero-based) call.
#[derive(Default)]
pub struct ScriptedBackend {
    pub calls: Vec<usize>,
    fail_on_call: Option<usize>,
}

impl ScriptedBackend {
    pub fn failing_on(call: usize) -> Self {
        Self {
            calls: Vec::new(),
            fail_on_call: Some(call),
        }
    }
}

impl InferenceBackend for ScriptedBackend {
    fn infer(
        &mut self,
        prompts: &[ChatPrompt],
        _sampling: &SamplingConfig,
    ) -> Result<Vec<Completion>, BackendError> {
        let call = self.calls.len();
        self.calls.push(prompts.len());
        if self.fail_on_call == Some(call) {
            return Err(BackendError::Connection("injected failure".into()));
        }
        Ok(prompts
            .iter()
            .map(|p| {
                let even = p.user_content().unwrap_or_default().len() % 2 == 0;
                Completion::text(if even { "Yes" } else { "No" })
            })
            .collect())
    }
}

pub fn identity() -> JobIdentity {
    JobIdentity {
        relation: "P19".into(),
        count_high: 1000,
        count_low: 10,
        setting: FrequencySetting::HighToLow,
        template: TemplateType::Qa,
    }
}

pub fn prober() -> Prober {
    Prober::new(
        TemplateType::Qa,
        "Was {subject} {predicate} {object}?",
        "Is {object} {predicate} {subject}?",
        "born in",
        "the birthplace of",
    )
    .unwrap()
}

/// `n` distinct items; item `i` has `1 + i % variants` subject names.
pub fn items(n: usize, variants: usize) -> Vec<WorkItem> {
    (0..n)
        .map(|i| WorkItem {
            subject: format!("Q{i}"),
            object: format!("Q{}", 1_000_000 + i),
            subject_names: (0..=(i % variants.max(1)))
                .map(|v| format!("person {i} v{v}"))
                .collect(),
            object_names: vec![format!("place {i}")],
            subject_count: 5000,
            object_count: 3,
        })
        .collect()
}

pub fn executor(
    dir: &Path,
    backend: ScriptedBackend,
    batch_size: usize,
) -> BatchExecutor<ScriptedBackend> {
    BatchExecutor::new(
        backend,
        prober(),
        CheckpointStore::flat(dir),
        SamplingConfig::default(),
        batch_size,
    )
}

pub fn load_final(dir: &Path) -> ResultAccumulator {
    let store = CheckpointStore::flat(dir);
    let path = store.path(&CheckpointKey::final_result(&identity()));
    store.load(&path).unwrap()
}
