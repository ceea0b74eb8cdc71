//! Workers and the generation pool that runs them.
//!
//! A worker process claims jobs from the shared store, relaxes each with its
//! own calculator, and writes the result back. The scheduler starts a fresh
//! generation of workers whenever the store has claimable work and waits for
//! all of them before peeking again.
//!
//! ```text
//!                 ┌───────────────────┐
//!                 │  PoolScheduler    │  peek ─ sleep ─ peek ─ launch
//!                 └─────────┬─────────┘
//!             ┌─────────────┼─────────────┐
//!       ┌─────▼─────┐ ┌─────▼─────┐ ┌─────▼─────┐
//!       │ Worker 0  │ │ Worker 1  │ │ Worker N  │   relaxd run --internal-worker
//!       │ claim     │ │ claim     │ │ claim     │
//!       │ evaluate ─┼─┼─► calculator program   │
//!       │ complete  │ │ complete  │ │ complete  │
//!       └─────┬─────┘ └─────┬─────┘ └─────┬─────┘
//!             └─────────────┼─────────────┘
//!                     ┌─────▼─────┐
//!                     │  SQLite   │  atomic claim / complete
//!                     └───────────┘
//! ```
//!
//! Workers share nothing in memory. Every coordination step goes through the
//! store's atomic operations.

pub mod pool;
pub mod signals;
mod spawn;
pub mod worker_loop;
pub mod worker_main;

pub use pool::{
    GenerationLauncher, InlineLauncher, PoolScheduler, ProcessLauncher, SchedulerConfig,
    SchedulerStats,
};
pub use worker_loop::{StopReason, WorkerLoop, WorkerSummary};
pub use worker_main::run_worker_main;

use crate::error::{RelaxError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::warn;

static SHUTDOWN: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Process-wide shutdown flag, set by SIGINT, SIGTERM or SIGHUP.
///
/// The first signal requests a graceful drain. A second one exits at once
/// with status 130, stranding any job in flight.
pub fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    if let Some(flag) = SHUTDOWN.get() {
        return Ok(flag.clone());
    }

    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        warn!("Shutdown requested; finishing the current job");
    })
    .map_err(|e| RelaxError::Worker(format!("Failed to install signal handler: {}", e)))?;

    Ok(SHUTDOWN.get_or_init(|| flag).clone())
}
