//! Dry-run planning: what apply would add, host by host

use anyhow::Result;
use colored::Colorize;
use reconcile::{HostReconciliation, ReconcileMode};

use super::{RunStatus, Session};
use crate::Context;
use crate::cli::PlanArgs;
use crate::ui;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<RunStatus> {
    let session = Session::open(ctx, &args.fleet)?;
    let desired = session.resolve_desired(&args.desired)?;

    if !ctx.quiet {
        ui::header("Plan");
        super::print_desired(&desired);
    }

    let reveal = args.output.show_secrets;
    let results = session.reconcile(ctx, &desired, ReconcileMode::Preview)?;
    let pending = render(&session, &results, !args.no_diff, reveal);

    let report = session.reporter(reveal).from_reconciliations(&results);
    ui::section("Summary");
    ui::print_report(&report);

    println!();
    let hosts = results
        .iter()
        .filter(|r| r.plan.as_ref().is_some_and(|p| !p.is_empty()))
        .count();
    if pending == 0 {
        ui::success("Nothing to add");
    } else {
        ui::info(&format!(
            "{pending} record(s) would be added on {hosts} host(s); run {} to apply",
            "driftguard apply".cyan()
        ));
    }

    super::export_report(args.output.output.as_deref(), &report)?;

    Ok(RunStatus::from_results(&report.hosts))
}

/// Print each host's plan and return the number of pending additions
pub(super) fn render(
    session: &Session,
    results: &[HostReconciliation],
    show_store_diff: bool,
    reveal: bool,
) -> usize {
    let mut pending = 0;

    for reconciliation in results {
        let result = &reconciliation.result;
        ui::section(&format!(
            "{} {}",
            ui::outcome_symbol(result.outcome),
            reconciliation.host.name.bold()
        ));

        let Some(plan) = &reconciliation.plan else {
            ui::print_host_results([result]);
            continue;
        };
        pending += plan.len();

        if plan.is_empty() {
            ui::dim("(nothing to add)");
        }
        for operation in plan.operations() {
            println!(
                "  {} {}",
                "+".green(),
                ui::record_line(operation.record(), &session.schema, reveal)
            );
        }

        let review: Vec<_> = plan.unreconciled().collect();
        if !review.is_empty() {
            ui::dim(&format!(
                "{} removed/changed record(s) left for review:",
                review.len()
            ));
            for entry in review {
                println!(
                    "    {} {}",
                    ui::classification_marker(entry.classification()),
                    entry.record().identity_display()
                );
            }
        }

        if show_store_diff
            && let Some(preview) = &reconciliation.preview
            && preview.operations > 0
        {
            ui::dim(&reconciliation.host.store.display().to_string());
            ui::print_text_diff(&preview.before, &preview.after);
        }
    }

    pending
}
