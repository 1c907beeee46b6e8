use anyhow::Result;
use colored::{ColoredString, Colorize};
use reconcile::{
    Classification, DiffEntry, DiffResult, DriftReport, HostResult, Outcome, Record,
    RecordSchema, RecordSet,
};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Ask the user to confirm before mutating hosts
pub fn confirm(prompt: &str) -> Result<bool> {
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}

// ============================================================================
// Drift rendering
// ============================================================================

pub fn outcome_symbol(outcome: Outcome) -> ColoredString {
    match outcome {
        Outcome::Success => "✓".green(),
        Outcome::Warning => "⚠".yellow(),
        Outcome::Error => "✗".red(),
    }
}

pub fn classification_marker(classification: Classification) -> ColoredString {
    match classification {
        Classification::Added => "+".green(),
        Classification::Removed => "-".red(),
        Classification::Changed => "~".yellow(),
        Classification::Unchanged => "=".dimmed(),
    }
}

/// One line per host: symbol, name, message, and backup location if any
pub fn print_host_results<'a>(results: impl IntoIterator<Item = &'a HostResult>) {
    for result in results {
        println!(
            "  {} {:<20} {}",
            outcome_symbol(result.outcome),
            result.host,
            truncate(&result.message, 100)
        );
        if let Some(category) = result.category.filter(|_| result.is_error()) {
            println!("      {}", category.advice().dimmed());
        }
        if let Some(backup) = &result.backup {
            println!("      {} {}", "backup:".dimmed(), backup.display());
        }
    }
}

/// Classified entries of one host's diff
pub fn print_diff(diff: &DiffResult, schema: &RecordSchema, reveal: bool, include_unchanged: bool) {
    let mut shown = 0;
    for entry in diff.entries() {
        let classification = entry.classification();
        if !include_unchanged && !classification.is_drift() {
            continue;
        }
        shown += 1;

        println!(
            "  {} {}",
            classification_marker(classification),
            record_line(entry.record(), schema, reveal)
        );

        if let DiffEntry::Changed { old, .. } = entry {
            println!(
                "      {} {} (was {})",
                "changed:".yellow(),
                entry.changed_fields().join(", "),
                old.payload_display(schema, reveal)
            );
        }
    }

    if shown == 0 {
        dim("(no drift)");
    }
}

/// Identity followed by the (masked) payload
pub fn record_line(record: &Record, schema: &RecordSchema, reveal: bool) -> String {
    let payload = record.payload_display(schema, reveal);
    if payload.is_empty() {
        record.identity_display()
    } else {
        format!(
            "{} {}",
            record.identity_display(),
            format!("[{payload}]").dimmed()
        )
    }
}

pub fn print_records(records: &RecordSet, schema: &RecordSchema, reveal: bool) {
    if records.is_empty() {
        dim("(no records)");
        return;
    }
    for record in records.records() {
        println!("  {} {}", "•".cyan(), record_line(record, schema, reveal));
    }
}

/// Counts per host and classification, then fleet totals
pub fn print_report(report: &DriftReport) {
    let mut hosts: Vec<&str> = report.counts.iter().map(|c| c.host.as_str()).collect();
    hosts.extend(report.hosts.iter().map(|h| h.host.as_str()));
    hosts.sort_unstable();
    hosts.dedup();

    println!(
        "  {:<20} {:>7} {:>7} {:>7} {:>9}",
        "HOST".bold(),
        "ADDED".bold(),
        "REMOVED".bold(),
        "CHANGED".bold(),
        "UNCHANGED".bold()
    );
    for host in hosts {
        let counts = report.host_counts(host);
        let status = report
            .hosts
            .iter()
            .find(|h| h.host == host)
            .map_or_else(|| " ".normal(), |h| outcome_symbol(h.outcome));
        println!(
            "{} {:<20} {:>7} {:>7} {:>7} {:>9}",
            status, host, counts.added, counts.removed, counts.changed, counts.unchanged
        );
    }

    let totals = report.totals;
    println!(
        "  {:<20} {:>7} {:>7} {:>7} {:>9}",
        "TOTAL".bold(),
        totals.added,
        totals.removed,
        totals.changed,
        totals.unchanged
    );
    println!();
    println!(
        "  {} success, {} warning, {} error",
        report.outcome_count(Outcome::Success).to_string().green(),
        report.outcome_count(Outcome::Warning).to_string().yellow(),
        report.error_count().to_string().red()
    );
}

/// Line diff between two texts using the `similar` crate
pub fn print_text_diff(before: &str, after: &str) {
    let diff = similar::TextDiff::from_lines(before, after);
    let mut has_changes = false;

    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => {
                has_changes = true;
                print!("    {}", format!("- {change}").red());
            }
            similar::ChangeTag::Insert => {
                has_changes = true;
                print!("    {}", format!("+ {change}").green());
            }
            similar::ChangeTag::Equal => {}
        }
    }

    if !has_changes {
        println!("    {}", "(store unchanged)".dimmed());
    }
}

/// Truncate text for display, keeping the start
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = text.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("exact", 5), "exact");
    }

    #[test]
    fn test_truncate_long() {
        assert_eq!(truncate("connection refused by peer", 13), "connection...");
    }

    #[test]
    fn test_truncate_edge_cases() {
        assert_eq!(truncate("test", 3), "...");
        assert_eq!(truncate("", 10), "");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_record_line_masks_secrets() {
        colored::control::set_override(false);
        let schema = RecordSchema::new(vec![
            reconcile::FieldSpec::identity("Scope"),
            reconcile::FieldSpec::payload("Token").secret(),
        ])
        .unwrap();
        let record = Record::new(&[("Scope", "api")], &[("Token", "s3cr3tvalue")]);

        assert_eq!(record_line(&record, &schema, false), "Scope=api [Token=s3cr****]");
        assert!(record_line(&record, &schema, true).contains("s3cr3tvalue"));
    }

    #[test]
    fn test_markers() {
        colored::control::set_override(false);
        assert_eq!(classification_marker(Classification::Added).to_string(), "+");
        assert_eq!(classification_marker(Classification::Removed).to_string(), "-");
        assert_eq!(outcome_symbol(Outcome::Error).to_string(), "✗");
    }
}
