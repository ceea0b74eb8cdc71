//! Plain text output (tab-separated, no colors).

use super::energy_text;
use crate::db::queries::{JobRecord, QueueStats};

/// Print jobs one per line.
pub fn print_jobs(jobs: &[JobRecord]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }

    println!("ID\tSTATE\tENERGY\tLABEL");
    for job in jobs {
        let label = job
            .properties
            .as_ref()
            .and_then(|p| p.point_group.as_deref())
            .unwrap_or("-");
        println!("{}\t{}\t{}\t{}", job.id, job.state, energy_text(job), label);
    }
}

/// Print counts as `key<TAB>value` lines.
pub fn print_stats(stats: &QueueStats) {
    println!("queue\t{}", stats.queue);
    println!("pending\t{}", stats.pending);
    println!("locked\t{}", stats.locked);
    println!("completed\t{}", stats.completed);
    println!("not_converged\t{}", stats.not_converged);
    println!("ineligible\t{}", stats.ineligible);
    println!("total\t{}", stats.total);
    if let Some(oldest) = stats.oldest_lock {
        println!("oldest_lock\t{}", oldest.to_rfc3339());
    }
}
