//! JSON/CSV export of run results, format chosen by file extension

use anyhow::{Context, Result};
use reconcile::{DriftReport, HostCollection, Outcome, RecordSchema};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(Self::Csv),
            _ => anyhow::bail!(
                "Unsupported export format for {} (use .json or .csv)",
                path.display()
            ),
        }
    }
}

/// Write the report's rows (JSON gets the full report)
pub fn write_report(path: &Path, report: &DriftReport) -> Result<()> {
    match ExportFormat::from_path(path)? {
        ExportFormat::Json => write_json(path, report),
        ExportFormat::Csv => write_csv(path, &report.rows),
    }
}

/// One collected record, or one failed host
#[derive(Debug, Serialize)]
struct CollectedRow<'a> {
    host: &'a str,
    outcome: Outcome,
    identity: String,
    payload: String,
    message: &'a str,
}

/// Write collected records, masking secrets unless `reveal`
pub fn write_collection(
    path: &Path,
    collections: &[HostCollection],
    schema: &RecordSchema,
    reveal: bool,
) -> Result<()> {
    let mut rows = Vec::new();
    for collection in collections {
        let result = &collection.result;
        match &collection.records {
            Some(records) => rows.extend(records.records().map(|record| CollectedRow {
                host: &result.host,
                outcome: result.outcome,
                identity: record.identity_display(),
                payload: record.payload_display(schema, reveal),
                message: "",
            })),
            None => rows.push(CollectedRow {
                host: &result.host,
                outcome: result.outcome,
                identity: String::new(),
                payload: String::new(),
                message: &result.message,
            }),
        }
    }

    match ExportFormat::from_path(path)? {
        ExportFormat::Json => write_json(path, &rows),
        ExportFormat::Csv => write_csv(path, &rows),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut content = serde_json::to_string_pretty(value).context("Failed to serialize export")?;
    content.push('\n');
    fs::write(path, content).with_context(|| format!("Could not write {}", path.display()))
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Could not create {}", path.display()))?;
    for row in rows {
        writer.serialize(row).context("Failed to write CSV row")?;
    }
    writer
        .flush()
        .with_context(|| format!("Could not write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{DriftReporter, HostRef, HostResult, Record, RecordSet, ReportInput, diff};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn report() -> DriftReport {
        let desired = RecordSet::from_records(
            "d",
            vec![Record::new(&[("Assembly", "A"), ("Namespace", "r2"), ("TypeName", "*")], &[])],
        )
        .unwrap();
        let host = HostRef::new("web01", "/srv/web01.json");
        DriftReporter::new(Arc::new(RecordSchema::safe_controls()), false).summarize(vec![
            (
                "web01".to_string(),
                ReportInput::Diff(diff(&desired, &RecordSet::new("a"))),
            ),
            (
                "web01".to_string(),
                ReportInput::Host(HostResult::success(&host, "ok")),
            ),
        ])
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("a.CSV")).unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(Path::new("a.json")).unwrap(), ExportFormat::Json);
        assert!(ExportFormat::from_path(Path::new("a.xml")).is_err());
    }

    #[test]
    fn test_csv_report() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("drift.csv");
        write_report(&path, &report()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "host,identity,payload,classification,changed_fields,outcome,message,timestamp"
        );
        assert!(text.contains(",added,"));
        assert!(text.contains(",success,ok,"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_json_report() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("drift.json");
        write_report(&path, &report()).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["totals"]["added"], 1);
        assert_eq!(value["rows"][0]["classification"], "added");
    }

    #[test]
    fn test_collection_export_masks_secrets() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("records.json");
        let schema = RecordSchema::new(vec![
            reconcile::FieldSpec::identity("Scope"),
            reconcile::FieldSpec::payload("Key").secret(),
        ])
        .unwrap();
        let host = HostRef::new("web01", "/s.json");
        let record = Record::new(&[("Scope", "app")], &[("Key", "abcdef123")]);
        let records = RecordSet::from_records("web01", vec![record]).unwrap();
        let collections = vec![HostCollection {
            result: HostResult::success(&host, "1 record(s)"),
            records: Some(records),
            host,
        }];

        write_collection(&path, &collections, &schema, false).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Key=abcd****"));
        assert!(!text.contains("abcdef123"));
    }
}
