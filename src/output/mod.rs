//! Output formatting for job listings and queue status.

pub mod json;
pub mod plain;
pub mod table;

use crate::db::queries::{JobRecord, QueueStats};

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Colored table output (default).
    #[default]
    Table,
    /// JSON output.
    Json,
    /// Plain text output (no colors).
    Plain,
}

/// Table display options.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableOptions {
    /// Add a column with the relaxed structure's point group.
    pub show_label: bool,
    /// Use ASCII borders instead of Unicode.
    pub ascii: bool,
}

/// Print a job listing.
pub fn print_jobs(jobs: &[JobRecord], format: OutputFormat, options: TableOptions) {
    match format {
        OutputFormat::Table => table::print_jobs(jobs, options),
        OutputFormat::Json => json::print_json(jobs),
        OutputFormat::Plain => plain::print_jobs(jobs),
    }
}

/// Print per-queue counts.
pub fn print_stats(stats: &QueueStats, format: OutputFormat, options: TableOptions) {
    match format {
        OutputFormat::Table => table::print_stats(stats, options),
        OutputFormat::Json => json::print_json(stats),
        OutputFormat::Plain => plain::print_stats(stats),
    }
}

/// Short display text for a job's energy column.
pub(crate) fn energy_text(job: &JobRecord) -> String {
    match &job.properties {
        Some(props) if props.converged => format!("{:.6}", props.energy),
        Some(_) => "not converged".to_string(),
        None => "-".to_string(),
    }
}
