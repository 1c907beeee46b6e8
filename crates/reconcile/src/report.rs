//! Drift reporting
//!
//! Read-only aggregation of per-host diffs and host results into ordered
//! counts and flat rows suitable for export.

use crate::diff::{Classification, DiffCounts, DiffResult};
use crate::fleet::{HostCollection, HostReconciliation, HostResult, Outcome};
use crate::record::RecordSchema;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One item handed to the reporter
#[derive(Debug, Clone)]
pub enum ReportInput {
    Diff(DiffResult),
    Host(HostResult),
}

/// Count of one classification on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationCount {
    pub host: String,
    pub classification: Classification,
    pub count: usize,
}

/// Flat export row. Record rows carry a classification, host rows an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub host: String,
    pub identity: String,
    pub payload: String,
    pub classification: Option<Classification>,
    pub changed_fields: String,
    pub outcome: Option<Outcome>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered summary of a run
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub generated_at: DateTime<Utc>,
    pub counts: Vec<ClassificationCount>,
    pub totals: DiffCounts,
    pub hosts: Vec<HostResult>,
    pub rows: Vec<ExportRow>,
}

impl DriftReport {
    /// Per-classification counts for one host
    pub fn host_counts(&self, host: &str) -> DiffCounts {
        let mut counts = DiffCounts::default();
        for c in self.counts.iter().filter(|c| c.host == host) {
            match c.classification {
                Classification::Added => counts.added += c.count,
                Classification::Removed => counts.removed += c.count,
                Classification::Unchanged => counts.unchanged += c.count,
                Classification::Changed => counts.changed += c.count,
            }
        }
        counts
    }

    pub fn outcome_count(&self, outcome: Outcome) -> usize {
        self.hosts.iter().filter(|h| h.outcome == outcome).count()
    }

    pub fn error_count(&self) -> usize {
        self.outcome_count(Outcome::Error)
    }

    pub fn has_drift(&self) -> bool {
        self.totals.drift() > 0
    }
}

/// Builds [`DriftReport`]s
#[derive(Debug, Clone)]
pub struct DriftReporter {
    schema: Arc<RecordSchema>,
    reveal_secrets: bool,
}

impl DriftReporter {
    /// `reveal_secrets` disables masking of secret payload fields in rows
    pub fn new(schema: Arc<RecordSchema>, reveal_secrets: bool) -> Self {
        Self {
            schema,
            reveal_secrets,
        }
    }

    /// Group inputs by (host, classification) and flatten them into rows.
    ///
    /// Output is ordered by host, then classification, then identity,
    /// whatever the input order.
    pub fn summarize<I>(&self, inputs: I) -> DriftReport
    where
        I: IntoIterator<Item = (String, ReportInput)>,
    {
        let generated_at = Utc::now();
        let mut diffs: BTreeMap<String, Vec<DiffResult>> = BTreeMap::new();
        let mut hosts: Vec<HostResult> = Vec::new();

        for (host, input) in inputs {
            match input {
                ReportInput::Diff(result) => diffs.entry(host).or_default().push(result),
                ReportInput::Host(result) => hosts.push(result),
            }
        }
        hosts.sort_by(|a, b| (&a.host, &a.store).cmp(&(&b.host, &b.store)));

        let stamp_for = |host: &str| {
            hosts
                .iter()
                .find(|h| h.host == host)
                .map_or(generated_at, |h| h.timestamp)
        };

        let mut counts = Vec::new();
        let mut totals = DiffCounts::default();
        let mut rows = Vec::new();

        for (host, results) in &diffs {
            let timestamp = stamp_for(host);
            let mut per_class: BTreeMap<Classification, usize> = BTreeMap::new();
            let mut host_rows = Vec::new();

            for result in results {
                let c = result.counts();
                totals.added += c.added;
                totals.removed += c.removed;
                totals.unchanged += c.unchanged;
                totals.changed += c.changed;

                for entry in result.entries() {
                    *per_class.entry(entry.classification()).or_default() += 1;
                    let record = entry.record();
                    host_rows.push(ExportRow {
                        host: host.clone(),
                        identity: record.identity_display(),
                        payload: record.payload_display(&self.schema, self.reveal_secrets),
                        classification: Some(entry.classification()),
                        changed_fields: entry.changed_fields().join(";"),
                        outcome: None,
                        message: String::new(),
                        timestamp,
                    });
                }
            }

            counts.extend(per_class.into_iter().map(|(classification, count)| {
                ClassificationCount {
                    host: host.clone(),
                    classification,
                    count,
                }
            }));
            host_rows.sort_by(|a, b| {
                (a.classification, &a.identity).cmp(&(b.classification, &b.identity))
            });
            rows.extend(host_rows);
        }

        rows.extend(hosts.iter().map(|h| ExportRow {
            host: h.host.clone(),
            identity: String::new(),
            payload: String::new(),
            classification: None,
            changed_fields: String::new(),
            outcome: Some(h.outcome),
            message: h.message.clone(),
            timestamp: h.timestamp,
        }));
        rows.sort_by(|a, b| a.host.cmp(&b.host));

        DriftReport {
            generated_at,
            counts,
            totals,
            hosts,
            rows,
        }
    }

    /// Summarize the output of a fleet reconciliation
    pub fn from_reconciliations(&self, results: &[HostReconciliation]) -> DriftReport {
        self.summarize(results.iter().flat_map(|r| {
            let host = r.host.name.clone();
            let diff = r
                .diff
                .clone()
                .map(|d| (host.clone(), ReportInput::Diff(d)));
            diff.into_iter()
                .chain(std::iter::once((host, ReportInput::Host(r.result.clone()))))
        }))
    }

    /// Summarize the output of a fleet collection (host rows only)
    pub fn from_collections(&self, results: &[HostCollection]) -> DriftReport {
        self.summarize(
            results
                .iter()
                .map(|c| (c.host.name.clone(), ReportInput::Host(c.result.clone()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::error::Error;
    use crate::record::{FieldSpec, Record, RecordSet};
    use crate::transport::HostRef;

    fn rec(ns: &str, key: &str) -> Record {
        Record::new(&[("Namespace", ns)], &[("Key", key)])
    }

    fn set(records: Vec<Record>) -> RecordSet {
        RecordSet::from_records("t", records).unwrap()
    }

    fn reporter(reveal: bool) -> DriftReporter {
        let schema = RecordSchema::new(vec![
            FieldSpec::identity("Namespace"),
            FieldSpec::payload("Key").secret(),
        ])
        .unwrap();
        DriftReporter::new(Arc::new(schema), reveal)
    }

    fn scenario() -> DiffResult {
        diff(
            &set(vec![rec("r1", "k1"), rec("r2", "k2"), rec("r3", "k3")]),
            &set(vec![rec("r1", "k1"), rec("r4", "k4")]),
        )
    }

    #[test]
    fn test_counts_grouped_by_host_and_classification() {
        let report = reporter(false).summarize(vec![
            ("web02".to_string(), ReportInput::Diff(scenario())),
            ("web01".to_string(), ReportInput::Diff(scenario())),
        ]);

        assert_eq!(report.counts.len(), 6);
        assert_eq!(report.counts[0].host, "web01");
        assert_eq!(report.counts[0].classification, Classification::Added);
        assert_eq!(report.counts[0].count, 2);
        assert_eq!(report.host_counts("web02").removed, 1);
        assert_eq!(report.totals.added, 4);
        assert!(report.has_drift());
    }

    #[test]
    fn test_rows_mask_secrets() {
        let report = reporter(false).summarize(vec![(
            "web01".to_string(),
            ReportInput::Diff(diff(&set(vec![rec("r1", "supersecret")]), &RecordSet::new("a"))),
        )]);
        assert_eq!(report.rows[0].payload, "Key=supe****");

        let revealed = reporter(true).summarize(vec![(
            "web01".to_string(),
            ReportInput::Diff(diff(&set(vec![rec("r1", "supersecret")]), &RecordSet::new("a"))),
        )]);
        assert_eq!(revealed.rows[0].payload, "Key=supersecret");
    }

    #[test]
    fn test_changed_fields_in_rows() {
        let result = diff(&set(vec![rec("r1", "new")]), &set(vec![rec("r1", "old")]));
        let report = reporter(false).summarize(vec![("h".to_string(), ReportInput::Diff(result))]);
        assert_eq!(report.rows[0].classification, Some(Classification::Changed));
        assert_eq!(report.rows[0].changed_fields, "Key");
    }

    #[test]
    fn test_host_results_counted() {
        let ok = HostResult::success(&HostRef::new("a", "/s.json"), "fine");
        let failed = HostResult::from_error(
            &HostRef::new("b", "/s.json"),
            &Error::transport("b", "refused"),
        );
        let report = reporter(false).summarize(vec![
            ("b".to_string(), ReportInput::Host(failed)),
            ("a".to_string(), ReportInput::Host(ok.clone())),
            ("a".to_string(), ReportInput::Diff(scenario())),
        ]);

        assert_eq!(report.error_count(), 1);
        assert_eq!(report.outcome_count(Outcome::Success), 1);
        assert_eq!(report.hosts[0].host, "a");
        assert!(report.rows.iter().all(|r| r.host != "a" || r.timestamp == ok.timestamp));
    }

    #[test]
    fn test_collections_report_host_rows_only() {
        let web01 = HostRef::new("web01", "/s.json");
        let web02 = HostRef::new("web02", "/s.json");
        let collections = vec![
            HostCollection {
                host: web02.clone(),
                records: None,
                result: HostResult::from_error(&web02, &Error::not_found("/s.json on web02")),
            },
            HostCollection {
                host: web01.clone(),
                records: Some(set(vec![rec("r1", "k1")])),
                result: HostResult::success(&web01, "1 record(s)"),
            },
        ];

        let report = reporter(false).from_collections(&collections);
        assert_eq!(report.hosts.len(), 2);
        assert_eq!(report.hosts[0].host, "web01");
        assert_eq!(report.error_count(), 1);
        assert!(report.rows.is_empty());
        assert!(!report.has_drift());
    }

    #[test]
    fn test_empty_report() {
        let report = reporter(false).summarize(Vec::new());
        assert!(report.counts.is_empty());
        assert!(!report.has_drift());
        assert_eq!(report.error_count(), 0);
    }
}
