//! Terminal rendering of run reports.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use membersync_core::engine::RunReport;
use membersync_core::executor::OperationStatus;

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

/// Print the diff, the plan outcome and any rejected rows for one run.
pub fn print_report(report: &RunReport) {
    println!();
    print_diff(report);

    if report.dry_run {
        println!(
            "{} addition(s), {} removal(s) pending; nothing dispatched.",
            report.diff.additions.len(),
            report.diff.removals.len()
        );
        println!();
        return;
    }

    print_outcomes(report);
    print_rejected(report);

    let mut summary = new_table(vec!["Succeeded", "Failed", "Skipped", "Rejected", "State"]);
    summary.add_row(vec![
        Cell::new(report.execution.succeeded()).fg(Color::Green),
        Cell::new(report.execution.failed()).fg(if report.execution.failed() > 0 {
            Color::Red
        } else {
            Color::Reset
        }),
        Cell::new(report.execution.skipped() + report.skipped.len()),
        Cell::new(report.rejected.len()),
        Cell::new(report.state),
    ]);
    println!("{}", summary);
    println!();
}

fn print_diff(report: &RunReport) {
    if report.diff.is_empty() {
        println!("Memberships are up to date.");
        println!();
        return;
    }

    let mut table = new_table(vec!["Change", "Org", "Email", "Role", "Detail"]);
    for addition in &report.diff.additions {
        let m = &addition.membership;
        table.add_row(vec![
            Cell::new("+ add").fg(Color::Green),
            Cell::new(&m.org),
            Cell::new(&m.user_email),
            Cell::new(&m.role),
            Cell::new(if addition.user_exists_in_org {
                "role change"
            } else {
                "new to org"
            }),
        ]);
    }
    for removal in &report.diff.removals {
        table.add_row(vec![
            Cell::new("- remove").fg(Color::Red),
            Cell::new(&removal.org),
            Cell::new(&removal.user_email),
            Cell::new(&removal.role),
            Cell::new(removal.reason),
        ]);
    }
    println!("{}", table);
}

fn print_outcomes(report: &RunReport) {
    let outcomes: Vec<_> = report.execution.outcomes().collect();
    if outcomes.is_empty() && report.skipped.is_empty() {
        return;
    }

    let mut table = new_table(vec!["Op", "Kind", "Description", "Status"]);
    for outcome in outcomes {
        let status = match &outcome.status {
            OperationStatus::Succeeded => Cell::new("ok").fg(Color::Green),
            OperationStatus::Failed { message } => Cell::new(format!("failed: {}", message)).fg(Color::Red),
            OperationStatus::Skipped { reason } => Cell::new(format!("skipped: {}", reason)).fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(outcome.id),
            Cell::new(outcome.kind),
            Cell::new(&outcome.description),
            status,
        ]);
    }
    for skipped in &report.skipped {
        table.add_row(vec![
            Cell::new("-"),
            Cell::new("-"),
            Cell::new(&skipped.membership),
            Cell::new(format!("skipped: {}", skipped.reason)).fg(Color::Yellow),
        ]);
    }
    println!("{}", table);
}

fn print_rejected(report: &RunReport) {
    if report.rejected.is_empty() {
        return;
    }
    let mut table = new_table(vec!["Rejected row", "Error"]);
    for rejected in &report.rejected {
        table.add_row(vec![
            Cell::new(&rejected.subject),
            Cell::new(&rejected.error).fg(Color::Red),
        ]);
    }
    println!("{}", table);
}
