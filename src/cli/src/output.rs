//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};
use regmirror_core::{ArchStatus, JobResult, MirrorSummary};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Short status of a job, e.g. `ok (2 copied, 1 unchanged)`.
pub fn job_status(result: &JobResult) -> String {
    match &result.outcome {
        Ok(report) => {
            let units = &report.units;
            let mut parts = Vec::new();
            for (label, count) in [
                ("copied", units.count(|s| *s == ArchStatus::Copied)),
                ("unchanged", units.count(|s| *s == ArchStatus::Unchanged)),
                ("failed", units.failures()),
            ] {
                if count > 0 {
                    parts.push(format!("{} {}", count, label));
                }
            }
            let state = if units.failures() > 0 || units.list_error.is_some() {
                "partial"
            } else {
                "ok"
            };
            if parts.is_empty() {
                state.to_string()
            } else {
                format!("{} ({})", state, parts.join(", "))
            }
        }
        Err(failure) => format!("failed at {}", failure.stage),
    }
}

/// One row per job.
pub fn print_results(results: &[JobResult]) {
    let mut table = new_table(&["LINE", "SOURCE", "DEST", "TAG", "STRATEGY", "STATUS"]);
    for result in results {
        let (source, dest, strategy) = match &result.outcome {
            Ok(report) => (
                report.source.to_string(),
                report.dest.to_string(),
                report.strategy,
            ),
            Err(_) => (result.job.source.clone(), result.job.dest.clone(), "-"),
        };
        table.add_row(vec![
            result.job.line.to_string(),
            source,
            dest,
            result.job.tag.clone(),
            strategy.to_string(),
            job_status(result),
        ]);
    }
    println!("{table}");

    for result in results {
        if let Err(failure) = &result.outcome {
            eprintln!("line {}: {}: {}", result.job.line, result.job, failure);
        }
    }
}

pub fn print_summary(summary: &MirrorSummary) {
    println!(
        "\n{} succeeded, {} failed; {} copied, {} unchanged, {} not found, {} architecture failures",
        summary.jobs_succeeded,
        summary.jobs_failed,
        summary.copied,
        summary.unchanged,
        summary.not_found,
        summary.unit_failures
    );
}
