//! Semantic-judgment ("soft EM") pass over finished results.
//!
//! Every stored completion is shown to a judge model together with the
//! correct answer; the raw judgments are appended to `answer_sem`.

use std::path::{Path, PathBuf};

use probe_config::{SamplingConfig, TemplateType};
use probe_data::PairKey;

use crate::{
    backend::{BackendError, InferenceBackend, check_len},
    prompt::ChatPrompt,
    result::{DirectionResults, ResultAccumulator},
};

const JUDGE_SYSTEM: &str = "You are a helpful assistant";

fn judge_prompt(completion: &str, correct: &str) -> ChatPrompt {
    ChatPrompt::with_system(
        JUDGE_SYSTEM,
        format!(
            "Are 'S1' and 'S2' equivalent? Respond with only one word, either 'Yes' if they are \
             equivalent or 'No' if they are inequivalent. Do not include any additional text or \
             commentary.\nS1: {completion}\nS2: {correct}"
        ),
    )
}

/// Soft-EM counts for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftEm {
    /// Completions sent to the judge.
    pub judged: usize,
    /// Keys with at least one "yes" judgment.
    pub anyone: usize,
    /// Keys whose most frequent judgment is "yes".
    pub majority: usize,
}

impl SoftEm {
    #[must_use]
    pub fn anyone_rate(&self) -> f64 {
        rate(self.anyone, self.judged)
    }

    #[must_use]
    pub fn majority_rate(&self) -> f64 {
        rate(self.majority, self.judged)
    }
}

#[allow(clippy::cast_precision_loss)]
fn rate(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JudgeSummary {
    pub forward: SoftEm,
    pub backward: SoftEm,
}

/// Output file next to the final results: `{stem}_softem.json`.
#[must_use]
pub fn softem_path(final_path: &Path) -> PathBuf {
    let stem = final_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!("{stem}_softem.json"))
}

/// Judge every completion in `acc`, appending judgments in place.
pub fn judge<B: InferenceBackend + ?Sized>(
    backend: &mut B,
    acc: &mut ResultAccumulator,
    template: TemplateType,
) -> Result<JudgeSummary, BackendError> {
    let sampling = SamplingConfig::greedy();
    Ok(JudgeSummary {
        forward: judge_direction(backend, &mut acc.forward, template, &sampling)?,
        backward: judge_direction(backend, &mut acc.backward, template, &sampling)?,
    })
}

fn judge_direction<B: InferenceBackend + ?Sized>(
    backend: &mut B,
    results: &mut DirectionResults,
    template: TemplateType,
    sampling: &SamplingConfig,
) -> Result<SoftEm, BackendError> {
    let correct = template.display_word();
    let mut keys: Vec<PairKey> = Vec::new();
    let mut prompts = Vec::new();
    for (key, result) in results.iter() {
        for text in &result.text {
            keys.push(key.clone());
            prompts.push(judge_prompt(text, correct));
        }
    }
    if prompts.is_empty() {
        return Ok(SoftEm::default());
    }

    let judgments = backend.infer(&prompts, sampling)?;
    check_len(prompts.len(), &judgments)?;

    for (key, judgment) in keys.iter().zip(judgments) {
        if let Some(result) = results.get_mut(key) {
            result
                .answer_sem
                .get_or_insert_with(Vec::new)
                .push(judgment.text);
        }
    }

    let mut score = SoftEm {
        judged: prompts.len(),
        ..SoftEm::default()
    };
    for result in results.values() {
        let Some(sem) = result.answer_sem.as_deref() else {
            continue;
        };
        let normalized: Vec<String> = sem.iter().map(|s| s.trim().to_lowercase()).collect();
        if normalized.iter().any(|s| s == "yes") {
            score.anyone += 1;
        }
        if most_common(&normalized) == Some("yes") {
            score.majority += 1;
        }
    }
    Ok(score)
}

/// Most frequent value; ties go to the one seen first.
fn most_common(values: &[String]) -> Option<&str> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for v in values {
        match counts.iter_mut().find(|(s, _)| *s == v.as_str()) {
            Some((_, n)) => *n += 1,
            None => counts.push((v.as_str(), 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (s, n) in counts {
        if best.is_none_or(|(_, b)| n > b) {
            best = Some((s, n));
        }
    }
    best.map(|(s, _)| s)
}
