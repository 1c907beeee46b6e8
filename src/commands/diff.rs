use anyhow::Result;
use colored::Colorize;
use reconcile::ReconcileMode;

use super::{RunStatus, Session};
use crate::Context;
use crate::cli::DiffArgs;
use crate::ui;

pub fn run(ctx: &Context, args: DiffArgs) -> Result<RunStatus> {
    let session = Session::open(ctx, &args.fleet)?;
    let desired = session.resolve_desired(&args.desired)?;

    if !ctx.quiet {
        ui::header("Drift");
        super::print_desired(&desired);
    }

    let results = session.reconcile(ctx, &desired, ReconcileMode::Diff)?;
    let reveal = args.output.show_secrets;

    for reconciliation in &results {
        let result = &reconciliation.result;
        ui::section(&format!(
            "{} {}",
            ui::outcome_symbol(result.outcome),
            reconciliation.host.name.bold()
        ));
        match &reconciliation.diff {
            Some(diff) => ui::print_diff(diff, &session.schema, reveal, args.all),
            None => ui::print_host_results([result]),
        }
    }

    let report = session.reporter(reveal).from_reconciliations(&results);
    ui::section("Summary");
    ui::print_report(&report);
    super::export_report(args.output.output.as_deref(), &report)?;

    Ok(RunStatus::from_results(results.iter().map(|r| &r.result)))
}
