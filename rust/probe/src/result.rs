//! Per-key probe results and the accumulator persisted in checkpoints.

use std::collections::{BTreeMap, BTreeSet};

use probe_data::PairKey;
use serde::{Deserialize, Serialize};

/// Results for one key in one direction, one entry per name-variant prompt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub text: Vec<String>,
    pub answer_em: Vec<bool>,
    pub answer_in: Vec<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_sem: Option<Vec<String>>,
}

impl ProbeResult {
    /// Score and append one completion.
    pub fn record(&mut self, text: &str, correct: &str) {
        let lowered = text.trim().to_lowercase();
        self.answer_em.push(lowered == correct);
        self.answer_in.push(lowered.contains(correct));
        self.text.push(text.to_string());
    }

    /// Whether any variant was answered exactly right.
    #[must_use]
    pub fn any_exact(&self) -> bool {
        self.answer_em.iter().any(|&hit| hit)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

pub type DirectionResults = BTreeMap<PairKey, ProbeResult>;

/// Forward and backward results gathered over all processed batches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultAccumulator {
    #[serde(with = "entries")]
    pub forward: DirectionResults,
    #[serde(with = "entries")]
    pub backward: DirectionResults,
}

impl ResultAccumulator {
    /// Merge one batch; a key already present is replaced.
    pub fn merge(&mut self, forward: DirectionResults, backward: DirectionResults) {
        self.forward.extend(forward);
        self.backward.extend(backward);
    }

    /// Keys present in either direction.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<PairKey> {
        self.forward
            .keys()
            .chain(self.backward.keys())
            .cloned()
            .collect()
    }

    /// Keys with at least one exact match, per direction.
    #[must_use]
    pub fn hits(&self) -> (usize, usize) {
        let count = |m: &DirectionResults| m.values().filter(|r| r.any_exact()).count();
        (count(&self.forward), count(&self.backward))
    }
}

/// JSON object keys must be strings, so each direction is stored as a list of
/// `{subject, object, text, answer_em, ...}` entries.
mod entries {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{DirectionResults, PairKey, ProbeResult};

    #[derive(Serialize)]
    struct EntryRef<'a> {
        subject: &'a str,
        object: &'a str,
        #[serde(flatten)]
        result: &'a ProbeResult,
    }

    #[derive(Deserialize)]
    struct Entry {
        subject: String,
        object: String,
        #[serde(flatten)]
        result: ProbeResult,
    }

    pub fn serialize<S: Serializer>(map: &DirectionResults, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(map.iter().map(|(key, result)| EntryRef {
            subject: &key.subject,
            object: &key.object,
            result,
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DirectionResults, D::Error> {
        let entries = Vec::<Entry>::deserialize(d)?;
        Ok(entries
            .into_iter()
            .map(|e| (PairKey::new(e.subject, e.object), e.result))
            .collect())
    }
}
