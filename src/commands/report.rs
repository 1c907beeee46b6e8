use anyhow::Result;
use reconcile::ReconcileMode;

use super::{RunStatus, Session};
use crate::Context;
use crate::cli::ReportArgs;
use crate::ui;

pub fn run(ctx: &Context, args: ReportArgs) -> Result<RunStatus> {
    let session = Session::open(ctx, &args.fleet)?;
    let desired = session.resolve_desired(&args.desired)?;

    if !ctx.quiet {
        ui::header("Drift Report");
        super::print_desired(&desired);
        println!();
    }

    let results = session.reconcile(ctx, &desired, ReconcileMode::Diff)?;
    let report = session
        .reporter(args.output.show_secrets)
        .from_reconciliations(&results);

    ui::print_report(&report);
    println!();
    if report.has_drift() {
        ui::warn("Drift detected; run `driftguard diff` for details");
    } else if report.error_count() == 0 {
        ui::success("No drift");
    }

    super::export_report(args.output.output.as_deref(), &report)?;

    Ok(RunStatus::from_results(&report.hosts))
}
