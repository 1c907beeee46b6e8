//! Reconciliation planner - additive, idempotent patch plans

use crate::diff::{Classification, DiffEntry, DiffResult};
use crate::record::Record;

/// A corrective operation. Only additions are planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOperation {
    Add(Record),
}

impl PatchOperation {
    pub fn record(&self) -> &Record {
        match self {
            Self::Add(record) => record,
        }
    }
}

/// Ordered operations for one host plus the diff they came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchPlan {
    operations: Vec<PatchOperation>,
    diff: DiffResult,
}

impl PatchPlan {
    pub fn operations(&self) -> &[PatchOperation] {
        &self.operations
    }

    pub fn diff(&self) -> &DiffResult {
        &self.diff
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Records the plan will add, in plan order
    pub fn records_to_add(&self) -> Vec<Record> {
        self.operations.iter().map(|op| op.record().clone()).collect()
    }

    /// Drift the plan leaves for review (removed and changed entries)
    pub fn unreconciled(&self) -> impl Iterator<Item = &DiffEntry> {
        self.diff.entries().iter().filter(|e| {
            matches!(
                e.classification(),
                Classification::Removed | Classification::Changed
            )
        })
    }
}

/// Plan one `Add` per added entry, in the diff's order.
///
/// Removed and changed entries are reported but never corrected, so a plan
/// computed against a store that already received a prior apply is empty.
pub fn plan(diff: DiffResult) -> PatchPlan {
    let operations = diff
        .entries()
        .iter()
        .filter_map(|entry| match entry {
            DiffEntry::Added(record) => Some(PatchOperation::Add(record.clone())),
            _ => None,
        })
        .collect();

    PatchPlan { operations, diff }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::record::RecordSet;

    fn rec(ns: &str, safe: &str) -> Record {
        Record::new(&[("Namespace", ns)], &[("Safe", safe)])
    }

    fn set(records: Vec<Record>) -> RecordSet {
        RecordSet::from_records("t", records).unwrap()
    }

    #[test]
    fn test_plan_only_adds() {
        let desired = set(vec![rec("r1", "T"), rec("r2", "T"), rec("r3", "T")]);
        let actual = set(vec![rec("r1", "T"), rec("r4", "T")]);

        let plan = plan(diff(&desired, &actual));
        let added: Vec<&str> = plan
            .operations()
            .iter()
            .filter_map(|op| op.record().get("Namespace"))
            .collect();
        assert_eq!(added, vec!["r2", "r3"]);
        assert_eq!(plan.unreconciled().count(), 1);
    }

    #[test]
    fn test_removed_and_changed_never_planned() {
        let desired = set(vec![rec("kept", "new-value")]);
        let actual = set(vec![rec("kept", "old-value"), rec("extra", "T")]);

        let plan = plan(diff(&desired, &actual));
        assert!(plan.is_empty());
        assert_eq!(plan.unreconciled().count(), 2);
    }

    #[test]
    fn test_plan_is_idempotent() {
        let desired = set(vec![rec("r1", "T"), rec("r2", "T")]);
        let actual = set(vec![rec("r1", "T")]);

        let first = plan(diff(&desired, &actual));
        let mut after = actual.clone();
        for record in first.records_to_add() {
            after.insert(record).unwrap();
        }

        let second = plan(diff(&desired, &after));
        assert!(second.is_empty());
        assert_eq!(second.diff().counts().unchanged, 2);
    }
}
