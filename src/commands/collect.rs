use anyhow::Result;

use super::{RunStatus, Session};
use crate::Context;
use crate::cli::CollectArgs;
use crate::export;
use crate::progress::HostProgress;
use crate::ui;

pub fn run(ctx: &Context, args: CollectArgs) -> Result<RunStatus> {
    let session = Session::open(ctx, &args.fleet)?;

    if !ctx.quiet {
        ui::header("Collect");
        ui::kv("Section", &session.section.to_string());
        ui::kv("Hosts", &session.hosts.len().to_string());
    }

    let progress = HostProgress::new("Collecting", ctx.quiet);
    let collections = session
        .orchestrator()
        .collect(&session.hosts, &session.loader(), &progress)?;

    ui::section("Hosts");
    ui::print_host_results(collections.iter().map(|c| &c.result));

    let report = session
        .reporter(args.output.show_secrets)
        .from_collections(&collections);
    ui::section("Summary");
    ui::print_report(&report);

    if args.records {
        for collection in &collections {
            if let Some(records) = &collection.records {
                ui::section(&collection.host.name);
                ui::print_records(records, &session.schema, args.output.show_secrets);
            }
        }
    }

    if let Some(path) = &args.output.output {
        export::write_collection(
            path,
            &collections,
            &session.schema,
            args.output.show_secrets,
        )?;
        ui::success(&format!("Wrote {}", path.display()));
    }

    Ok(RunStatus::from_results(&report.hosts))
}
