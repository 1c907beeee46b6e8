//! Desired-vs-actual classification
//!
//! Pure computation over two materialized record sets. Every identity in
//! either input lands in exactly one bucket, and entries come out sorted by
//! identity key so output is stable across runs.

use crate::record::{IdentityKey, Record, RecordSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Classification of a single identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Desired but not present on the host
    Added,
    /// Present on the host but not desired
    Removed,
    /// Present on both sides with equal payload
    Unchanged,
    /// Present on both sides with differing payload
    Changed,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
        }
    }

    pub fn is_drift(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One classified identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffEntry {
    Added(Record),
    Removed(Record),
    Unchanged(Record),
    Changed {
        /// Record as found on the host
        old: Record,
        /// Record as desired
        new: Record,
        changed_fields: Vec<String>,
    },
}

impl DiffEntry {
    pub fn classification(&self) -> Classification {
        match self {
            Self::Added(_) => Classification::Added,
            Self::Removed(_) => Classification::Removed,
            Self::Unchanged(_) => Classification::Unchanged,
            Self::Changed { .. } => Classification::Changed,
        }
    }

    /// The record that best describes this entry (desired side when present)
    pub fn record(&self) -> &Record {
        match self {
            Self::Added(r) | Self::Removed(r) | Self::Unchanged(r) => r,
            Self::Changed { new, .. } => new,
        }
    }

    pub fn key(&self) -> IdentityKey {
        self.record().key()
    }

    pub fn changed_fields(&self) -> &[String] {
        match self {
            Self::Changed { changed_fields, .. } => changed_fields,
            _ => &[],
        }
    }
}

/// Per-classification counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffCounts {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub changed: usize,
}

impl DiffCounts {
    pub fn total(&self) -> usize {
        self.added + self.removed + self.unchanged + self.changed
    }

    pub fn drift(&self) -> usize {
        self.added + self.removed + self.changed
    }

    pub fn get(&self, classification: Classification) -> usize {
        match classification {
            Classification::Added => self.added,
            Classification::Removed => self.removed,
            Classification::Unchanged => self.unchanged,
            Classification::Changed => self.changed,
        }
    }
}

/// Ordered classification covering the union of both inputs' identities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    entries: Vec<DiffEntry>,
}

impl DiffResult {
    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of one classification, in identity order
    pub fn of(&self, classification: Classification) -> impl Iterator<Item = &DiffEntry> {
        self.entries
            .iter()
            .filter(move |e| e.classification() == classification)
    }

    pub fn counts(&self) -> DiffCounts {
        let mut counts = DiffCounts::default();
        for entry in &self.entries {
            match entry.classification() {
                Classification::Added => counts.added += 1,
                Classification::Removed => counts.removed += 1,
                Classification::Unchanged => counts.unchanged += 1,
                Classification::Changed => counts.changed += 1,
            }
        }
        counts
    }

    pub fn has_drift(&self) -> bool {
        self.entries.iter().any(|e| e.classification().is_drift())
    }
}

/// Classify `desired` against `actual`.
///
/// Identity fields match case-insensitively; payload fields compare exactly.
pub fn diff(desired: &RecordSet, actual: &RecordSet) -> DiffResult {
    let mut entries = Vec::with_capacity(desired.len().max(actual.len()));
    let mut want = desired.iter().peekable();
    let mut have = actual.iter().peekable();

    // Both sides iterate in key order, so a merge walk visits the union once
    loop {
        let order = match (want.peek(), have.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((dk, _)), Some((ak, _))) => dk.cmp(ak),
        };

        match order {
            Ordering::Less => {
                if let Some((_, record)) = want.next() {
                    entries.push(DiffEntry::Added(record.clone()));
                }
            }
            Ordering::Greater => {
                if let Some((_, record)) = have.next() {
                    entries.push(DiffEntry::Removed(record.clone()));
                }
            }
            Ordering::Equal => {
                if let (Some((_, new)), Some((_, old))) = (want.next(), have.next()) {
                    let changed_fields = old.changed_fields(new);
                    if changed_fields.is_empty() {
                        entries.push(DiffEntry::Unchanged(old.clone()));
                    } else {
                        entries.push(DiffEntry::Changed {
                            old: old.clone(),
                            new: new.clone(),
                            changed_fields,
                        });
                    }
                }
            }
        }
    }

    DiffResult { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn rec(ns: &str, safe: &str) -> Record {
        Record::new(&[("Namespace", ns), ("TypeName", "*")], &[("Safe", safe)])
    }

    fn set(records: Vec<Record>) -> RecordSet {
        RecordSet::from_records("t", records).unwrap()
    }

    fn names(result: &DiffResult, classification: Classification) -> Vec<String> {
        result
            .of(classification)
            .map(|e| e.record().get("Namespace").unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_scenario_classification() {
        let desired = set(vec![rec("r1", "True"), rec("r2", "True"), rec("r3", "True")]);
        let actual = set(vec![rec("r1", "True"), rec("r4", "True")]);

        let result = diff(&desired, &actual);
        assert_eq!(names(&result, Classification::Added), vec!["r2", "r3"]);
        assert_eq!(names(&result, Classification::Removed), vec!["r4"]);
        assert_eq!(names(&result, Classification::Unchanged), vec!["r1"]);
        assert!(names(&result, Classification::Changed).is_empty());
    }

    #[test]
    fn test_case_insensitive_identity_match() {
        let desired = set(vec![rec("Foo.Bar", "True")]);
        let actual = set(vec![rec("foo.bar", "True")]);
        let result = diff(&desired, &actual);
        assert_eq!(result.counts().unchanged, 1);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_changed_records_fields() {
        let desired = set(vec![rec("Foo", "True")]);
        let actual = set(vec![rec("Foo", "False")]);
        let result = diff(&desired, &actual);

        let entry = &result.entries()[0];
        assert_eq!(entry.classification(), Classification::Changed);
        assert_eq!(entry.changed_fields(), ["Safe".to_string()]);
        if let DiffEntry::Changed { old, new, .. } = entry {
            assert_eq!(old.get("Safe"), Some("False"));
            assert_eq!(new.get("Safe"), Some("True"));
        }
    }

    #[test]
    fn test_payload_case_matters() {
        let desired = set(vec![rec("Foo", "True")]);
        let actual = set(vec![rec("Foo", "true")]);
        assert_eq!(diff(&desired, &actual).counts().changed, 1);
    }

    #[test]
    fn test_partition_is_complete_and_disjoint() {
        let desired = set(vec![
            rec("a", "1"),
            rec("b", "1"),
            rec("C", "1"),
            rec("d", "2"),
        ]);
        let actual = set(vec![rec("b", "1"), rec("c", "1"), rec("D", "1"), rec("e", "1")]);
        let result = diff(&desired, &actual);

        let union: BTreeSet<IdentityKey> = desired.keys().chain(actual.keys()).cloned().collect();
        let seen: Vec<IdentityKey> = result.entries().iter().map(DiffEntry::key).collect();
        let unique: BTreeSet<IdentityKey> = seen.iter().cloned().collect();

        assert_eq!(seen.len(), unique.len(), "an identity appears twice");
        assert_eq!(unique, union);
        assert_eq!(result.counts().total(), union.len());
    }

    #[test]
    fn test_output_sorted_by_identity() {
        let desired = set(vec![rec("zeta", "1"), rec("Alpha", "1")]);
        let actual = set(vec![rec("mid", "1")]);
        let result = diff(&desired, &actual);
        let keys: Vec<IdentityKey> = result.entries().iter().map(DiffEntry::key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_empty_inputs() {
        let result = diff(&RecordSet::new("d"), &RecordSet::new("a"));
        assert!(result.is_empty());
        assert!(!result.has_drift());
    }
}
