//! Colored table output.

use super::energy_text;
use crate::db::queries::{JobRecord, QueueStats};
use crate::output::TableOptions;
use crate::theme::{Semantic, ThemedCell};
use comfy_table::{
    Cell, CellAlignment, ContentArrangement, Table,
    presets::{ASCII_FULL, UTF8_FULL},
};

fn new_table(options: TableOptions) -> Table {
    let mut table = Table::new();
    if options.ascii {
        table.load_preset(ASCII_FULL);
    } else {
        table.load_preset(UTF8_FULL);
    }
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print jobs as a colored table.
pub fn print_jobs(jobs: &[JobRecord], options: TableOptions) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }

    let mut table = new_table(options);
    let mut headers = vec!["ID", "State", "Energy", "Created", "Locked / Completed"];
    if options.show_label {
        headers.push("Label");
    }
    table.set_header(headers);

    for job in jobs {
        let converged = job.properties.as_ref().map(|p| p.converged);
        let when = job
            .completed_at
            .or(job.locked_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());

        let mut row = vec![
            Cell::new(job.id).themed(Semantic::JobId),
            Cell::new(job.state).themed(Semantic::for_state(job.state, converged)),
            Cell::new(energy_text(job))
                .set_alignment(CellAlignment::Right)
                .themed(Semantic::Energy),
            Cell::new(job.created_at.format("%Y-%m-%d %H:%M:%S")).themed(Semantic::Muted),
            Cell::new(when),
        ];
        if options.show_label {
            let label = job
                .properties
                .as_ref()
                .and_then(|p| p.point_group.as_deref())
                .unwrap_or("-");
            row.push(Cell::new(label).themed(Semantic::Label));
        }
        table.add_row(row);
    }

    println!("{table}");
}

/// Print queue counts as a two-column table.
pub fn print_stats(stats: &QueueStats, options: TableOptions) {
    let mut table = new_table(options);
    table.set_header(vec!["Queue", stats.queue.as_str()]);

    let rows = [
        ("Pending", stats.pending, Semantic::Pending),
        ("Locked", stats.locked, Semantic::Locked),
        ("Completed", stats.completed, Semantic::Completed),
        ("  not converged", stats.not_converged, Semantic::NotConverged),
        ("Ineligible", stats.ineligible, Semantic::Muted),
        ("Total", stats.total, Semantic::JobId),
    ];
    for (name, count, semantic) in rows {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(count)
                .set_alignment(CellAlignment::Right)
                .themed(semantic),
        ]);
    }
    if let Some(oldest) = stats.oldest_lock {
        table.add_row(vec![
            Cell::new("Oldest lock"),
            Cell::new(oldest.format("%Y-%m-%d %H:%M:%S UTC")).themed(Semantic::Locked),
        ]);
    }

    println!("{table}");
}
