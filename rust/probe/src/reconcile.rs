//! End-of-run comparison of expected and processed keys.

use std::collections::BTreeSet;

use probe_data::{PairKey, WorkItem};

use crate::result::ResultAccumulator;

const EXAMPLE_LIMIT: usize = 5;

/// Keys the dataset should produce: one per item with at least one name
/// variant on each side.
#[must_use]
pub fn expected_keys(items: &[WorkItem]) -> BTreeSet<PairKey> {
    items
        .iter()
        .filter(|item| item.variant_count() > 0)
        .map(WorkItem::key)
        .collect()
}

/// Difference between expected and processed keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntegrityReport {
    pub missing: Vec<PairKey>,
    pub extra: Vec<PairKey>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

fn examples(keys: &[PairKey]) -> String {
    keys.iter()
        .take(EXAMPLE_LIMIT)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl std::fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!(
                "{} missing key(s), e.g. {}",
                self.missing.len(),
                examples(&self.missing)
            ));
        }
        if !self.extra.is_empty() {
            parts.push(format!(
                "{} unexpected key(s), e.g. {}",
                self.extra.len(),
                examples(&self.extra)
            ));
        }
        f.write_str(&parts.join("; "))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("integrity check failed: {report}")]
pub struct IntegrityError {
    pub report: IntegrityReport,
}

/// Compare processed keys against `expected`.
pub fn reconcile(
    expected: &BTreeSet<PairKey>,
    acc: &ResultAccumulator,
) -> Result<(), IntegrityError> {
    let processed = acc.keys();
    let report = IntegrityReport {
        missing: expected.difference(&processed).cloned().collect(),
        extra: processed.difference(expected).cloned().collect(),
    };
    if report.is_clean() {
        Ok(())
    } else {
        Err(IntegrityError { report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ProbeResult;

    fn item(id: &str, names: usize) -> WorkItem {
        WorkItem {
            subject: id.into(),
            object: format!("{id}o"),
            subject_names: (0..names).map(|i| format!("s{i}")).collect(),
            object_names: vec!["o".into()],
            subject_count: 1,
            object_count: 1,
        }
    }

    fn acc_with(keys: &[PairKey]) -> ResultAccumulator {
        let mut acc = ResultAccumulator::default();
        for key in keys {
            acc.forward.insert(key.clone(), ProbeResult::default());
            acc.backward.insert(key.clone(), ProbeResult::default());
        }
        acc
    }

    #[test]
    fn test_expected_skips_empty_variants() {
        let items = vec![item("a", 2), item("b", 0), item("c", 1)];
        let expected = expected_keys(&items);
        assert_eq!(expected.len(), 2);
        assert!(!expected.contains(&PairKey::new("b", "bo")));
    }

    #[test]
    fn test_clean() {
        let items = vec![item("a", 1), item("c", 1)];
        let expected = expected_keys(&items);
        let keys: Vec<_> = expected.iter().cloned().collect();
        assert!(reconcile(&expected, &acc_with(&keys)).is_ok());
    }

    #[test]
    fn test_missing_and_extra() {
        let expected = expected_keys(&[item("a", 1), item("b", 1)]);
        let acc = acc_with(&[PairKey::new("a", "ao"), PairKey::new("z", "zo")]);
        let err = reconcile(&expected, &acc).unwrap_err();
        assert_eq!(err.report.missing, vec![PairKey::new("b", "bo")]);
        assert_eq!(err.report.extra, vec![PairKey::new("z", "zo")]);
        let msg = err.to_string();
        assert!(msg.contains("1 missing key(s), e.g. (b, bo)"));
        assert!(msg.contains("1 unexpected key(s), e.g. (z, zo)"));
    }

    #[test]
    fn test_examples_capped() {
        let items: Vec<_> = (0..8).map(|i| item(&format!("k{i}"), 1)).collect();
        let err = reconcile(&expected_keys(&items), &ResultAccumulator::default()).unwrap_err();
        assert_eq!(err.report.missing.len(), 8);
        assert_eq!(err.to_string().matches("(k").count(), 5);
    }
}
