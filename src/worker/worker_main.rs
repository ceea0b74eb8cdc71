//! Worker subprocess entry point.
//!
//! Runs when `relaxd run --internal-worker` is invoked by the scheduler. The
//! exit status is the only thing the scheduler looks at: 0 when the loop
//! stopped cleanly, 1 when it failed and may have left a job locked.

use super::shutdown_flag;
use super::worker_loop::WorkerLoop;
use crate::config::Settings;
use crate::error::Result;
use crate::evaluator::ExternalCalculator;
use crate::store::SqliteStore;
use tracing::{error, info};

fn run(worker_id: usize, settings: &Settings) -> Result<()> {
    let shutdown = shutdown_flag()?;
    let calculator = ExternalCalculator::new(settings.require_calculator()?.clone());
    let store = SqliteStore::open(&settings.db_path, &settings.queue, settings.busy_timeout())?;

    let mut worker = WorkerLoop::new(store, calculator)
        .with_worker_id(worker_id)
        .with_budget(settings.job_budget())
        .with_shutdown(shutdown);
    let summary = worker.run()?;

    info!(
        worker = worker_id,
        processed = summary.processed,
        converged = summary.converged,
        not_converged = summary.not_converged,
        stopped = ?summary.stopped,
        "Worker exiting"
    );
    Ok(())
}

/// Run one worker to completion and exit the process.
pub fn run_worker_main(worker_id: usize, settings: &Settings) -> ! {
    match run(worker_id, settings) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(worker = worker_id, error = %e, "Worker failed");
            std::process::exit(1);
        }
    }
}
