use serde::{Deserialize, Serialize};

/// Identity of a work item: the (subject, object) entity-id pair.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub subject: String,
    pub object: String,
}

impl PairKey {
    #[must_use]
    pub fn new(subject: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
        }
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.subject, self.object)
    }
}

/// One (subject, object) fact with its surface-name variants and
/// entity frequencies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub subject: String,
    pub object: String,
    #[serde(alias = "subject_name")]
    pub subject_names: Vec<String>,
    #[serde(alias = "object_name")]
    pub object_names: Vec<String>,
    pub subject_count: u64,
    pub object_count: u64,
}

impl WorkItem {
    #[must_use]
    pub fn key(&self) -> PairKey {
        PairKey::new(&self.subject, &self.object)
    }

    /// Every (subject name, object name) combination, subject-major.
    pub fn expand(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.subject_names.iter().flat_map(move |s| {
            self.object_names
                .iter()
                .map(move |o| (s.as_str(), o.as_str()))
        })
    }

    /// Number of prompts this item expands to in each direction.
    #[must_use]
    pub fn variant_count(&self) -> usize {
        self.subject_names.len() * self.object_names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(subjects: &[&str], objects: &[&str]) -> WorkItem {
        WorkItem {
            subject: "Q1".into(),
            object: "Q2".into(),
            subject_names: subjects.iter().map(|s| (*s).to_string()).collect(),
            object_names: objects.iter().map(|s| (*s).to_string()).collect(),
            subject_count: 5,
            object_count: 7,
        }
    }

    #[test]
    fn test_expand_cartesian() {
        let it = item(&["Ada", "Ada Lovelace"], &["London", "City of London"]);
        let pairs: Vec<_> = it.expand().collect();
        assert_eq!(
            pairs,
            vec![
                ("Ada", "London"),
                ("Ada", "City of London"),
                ("Ada Lovelace", "London"),
                ("Ada Lovelace", "City of London"),
            ]
        );
        assert_eq!(it.variant_count(), 4);
    }

    #[test]
    fn test_empty_names_expand_to_nothing() {
        let it = item(&[], &["London"]);
        assert_eq!(it.expand().count(), 0);
        assert_eq!(it.variant_count(), 0);
    }

    #[test]
    fn test_key_ordering() {
        assert!(PairKey::new("Q1", "Q9") < PairKey::new("Q2", "Q0"));
        assert_eq!(PairKey::new("Q1", "Q2").to_string(), "(Q1, Q2)");
    }
}
