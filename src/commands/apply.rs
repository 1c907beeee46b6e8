//! Additive reconciliation: back up each store, then append missing records

use anyhow::Result;
use colored::Colorize;
use reconcile::{HostReconciliation, ReconcileMode};

use super::{RunStatus, Session, plan};
use crate::Context;
use crate::cli::{ApplyArgs, OutputArgs, PlanArgs};
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<RunStatus> {
    if args.dry_run {
        return plan::run(
            ctx,
            PlanArgs {
                desired: args.desired,
                fleet: args.fleet,
                output: args.output,
                no_diff: false,
            },
        );
    }

    let session = Session::open(ctx, &args.fleet)?;
    let desired = session.resolve_desired(&args.desired)?;
    let reveal = args.output.show_secrets;

    if !ctx.quiet {
        ui::header("Apply");
        super::print_desired(&desired);
    }

    // Preview pass so the prompt can show exactly what will be written
    let preview = session.reconcile(ctx, &desired, ReconcileMode::Preview)?;
    let pending = plan::render(&session, &preview, true, reveal);
    println!();

    if pending == 0 {
        ui::success("Every reachable host already has the desired records");
        return finish(&session, &preview, &args.output, reveal);
    }

    if !args.yes && !ui::confirm(&format!("Add {pending} record(s) to the fleet?"))? {
        ui::info("Aborted");
        // Nothing was written; hosts that failed the preview still count
        return Ok(declined_status(&preview));
    }

    let results = session.reconcile(ctx, &desired, ReconcileMode::Apply)?;

    ui::section("Results");
    ui::print_host_results(results.iter().map(|r| &r.result));

    let applied: usize = results.iter().map(|r| r.result.applied).sum();
    let patched = results.iter().filter(|r| r.result.applied > 0).count();
    println!();
    println!(
        "  {} record(s) added on {} host(s)",
        applied.to_string().green(),
        patched
    );

    finish(&session, &results, &args.output, reveal)
}

/// Print the summary table, export, and map host outcomes to a status
fn finish(
    session: &Session,
    results: &[HostReconciliation],
    output: &OutputArgs,
    reveal: bool,
) -> Result<RunStatus> {
    let report = session.reporter(reveal).from_reconciliations(results);
    ui::section("Summary");
    ui::print_report(&report);
    super::export_report(output.output.as_deref(), &report)?;
    Ok(RunStatus::from_results(&report.hosts))
}

fn declined_status(preview: &[HostReconciliation]) -> RunStatus {
    RunStatus::from_results(preview.iter().map(|r| &r.result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{Error, HostRef, HostResult};

    fn reconciliation(result: HostResult) -> HostReconciliation {
        HostReconciliation {
            host: HostRef::new(&result.host, &result.store),
            diff: None,
            plan: None,
            preview: None,
            result,
        }
    }

    #[test]
    fn test_declined_status_keeps_preview_errors() {
        let web01 = HostRef::new("web01", "/etc/app/web.json");
        let web02 = HostRef::new("web02", "/etc/app/web.json");
        let err = Error::transport("web02", "Connection refused");

        let clean = [reconciliation(HostResult::success(&web01, "1 to add"))];
        assert_eq!(declined_status(&clean), RunStatus::Clean);

        let failing = [
            reconciliation(HostResult::success(&web01, "1 to add")),
            reconciliation(HostResult::from_error(&web02, &err)),
        ];
        assert_eq!(declined_status(&failing), RunStatus::HostErrors);
    }
}
