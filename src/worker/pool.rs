//! Generation-based worker pool.
//!
//! The scheduler peeks the store for claimable work. When there is some it
//! launches a full generation of workers and waits for every one of them to
//! exit before peeking again. Worker exit reasons are logged and counted but
//! never turned into retries: a worker that died mid-job leaves that job
//! locked for an operator to release.

use super::signals::{TerminationReason, analyze_wait_status};
use super::spawn::WorkerCommand;
use super::worker_loop::WorkerLoop;
use crate::config::Settings;
use crate::error::Result;
use crate::evaluator::Calculator;
use crate::store::JobStore;
use nix::errno::Errno;
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Slice used to keep the idle sleep responsive to shutdown.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Outcome of one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub launched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs one generation of workers to completion.
pub trait GenerationLauncher {
    /// Launch `pool_size` workers and block until all of them have exited.
    fn run_generation(&mut self, generation: u64, pool_size: usize) -> Result<GenerationReport>;
}

/// Launches each worker as a separate OS process.
pub struct ProcessLauncher {
    command: WorkerCommand,
}

impl ProcessLauncher {
    pub fn new(settings: &Settings, verbose: u8, quiet: bool) -> Result<Self> {
        Ok(Self {
            command: WorkerCommand::new(settings, verbose, quiet)?,
        })
    }
}

fn wait_for(pid: Pid) -> TerminationReason {
    loop {
        match waitpid(pid, None) {
            Ok(status) => return analyze_wait_status(status),
            Err(Errno::EINTR) => continue,
            Err(_) => return TerminationReason::Unknown,
        }
    }
}

impl GenerationLauncher for ProcessLauncher {
    fn run_generation(&mut self, generation: u64, pool_size: usize) -> Result<GenerationReport> {
        let mut pids = Vec::with_capacity(pool_size);
        let mut spawn_error = None;
        for worker_id in 0..pool_size {
            match self.command.spawn(worker_id) {
                Ok(child) => pids.push((worker_id, Pid::from_raw(child.id() as i32))),
                Err(e) => {
                    spawn_error = Some(e);
                    break;
                }
            }
        }

        let mut report = GenerationReport {
            launched: pids.len(),
            ..Default::default()
        };
        for (worker_id, pid) in pids {
            let reason = wait_for(pid);
            if reason.is_success() {
                report.succeeded += 1;
                debug!(generation, worker = worker_id, pid = pid.as_raw(), "Worker exited");
            } else {
                report.failed += 1;
                warn!(
                    generation,
                    worker = worker_id,
                    pid = pid.as_raw(),
                    reason = %reason,
                    "Worker terminated abnormally"
                );
            }
        }

        match spawn_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Runs a single worker inside the scheduler's own process.
///
/// The calculator is built once and reused for every generation. Worker
/// errors are not isolated: a failing calculator stops the scheduler.
pub struct InlineLauncher<S, C> {
    worker: WorkerLoop<S, C>,
}

impl<S: JobStore, C: Calculator> InlineLauncher<S, C> {
    pub fn new(worker: WorkerLoop<S, C>) -> Self {
        Self { worker }
    }
}

impl<S: JobStore, C: Calculator> GenerationLauncher for InlineLauncher<S, C> {
    fn run_generation(&mut self, generation: u64, _pool_size: usize) -> Result<GenerationReport> {
        let summary = self.worker.run()?;
        debug!(generation, processed = summary.processed, "Inline worker finished");
        Ok(GenerationReport {
            launched: 1,
            succeeded: 1,
            failed: 0,
        })
    }
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Workers per generation.
    pub pool_size: usize,
    /// Sleep between peeks of an empty store.
    pub idle_interval: Duration,
    /// Return at the first empty peek instead of sleeping.
    pub exit_when_idle: bool,
    /// Stop after this many generations.
    pub max_generations: Option<u64>,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            pool_size: settings.workers,
            idle_interval: settings.idle_interval()?,
            exit_when_idle: false,
            max_generations: None,
        })
    }
}

/// Totals over a scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub generations: u64,
    pub workers_launched: usize,
    pub worker_failures: usize,
    pub idle_polls: u64,
}

/// Peeks the store and launches generations of workers.
pub struct PoolScheduler<S, L> {
    store: S,
    launcher: L,
    config: SchedulerConfig,
    shutdown: Arc<AtomicBool>,
}

impl<S: JobStore, L: GenerationLauncher> PoolScheduler<S, L> {
    /// `store` is only used for peeking.
    pub fn new(store: S, launcher: L, config: SchedulerConfig) -> Self {
        Self {
            store,
            launcher,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep `duration` unless shutdown is requested first.
    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shutting_down() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// Peek, launch, wait, repeat.
    ///
    /// Returns when shutdown is requested, when `max_generations` is reached,
    /// or at the first empty peek with `exit_when_idle`. Store errors end the
    /// run.
    #[instrument(level = "debug", skip(self), fields(pool_size = self.config.pool_size))]
    pub fn run_forever(&mut self) -> Result<SchedulerStats> {
        let mut stats = SchedulerStats::default();
        info!(
            pool_size = self.config.pool_size,
            idle_interval_ms = self.config.idle_interval.as_millis() as u64,
            "Scheduler started"
        );

        loop {
            if self.shutting_down() {
                info!("Shutdown requested; scheduler stopping");
                break;
            }
            if let Some(max) = self.config.max_generations
                && stats.generations >= max
            {
                debug!(max, "Generation limit reached");
                break;
            }

            if !self.store.has_claimable()? {
                if self.config.exit_when_idle {
                    info!("No claimable jobs; exiting");
                    break;
                }
                stats.idle_polls += 1;
                debug!("No claimable jobs; sleeping");
                self.sleep(self.config.idle_interval);
                continue;
            }

            stats.generations += 1;
            let generation = stats.generations;
            let started = Instant::now();
            let report = self
                .launcher
                .run_generation(generation, self.config.pool_size)?;
            stats.workers_launched += report.launched;
            stats.worker_failures += report.failed;

            info!(
                generation,
                launched = report.launched,
                failed = report.failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Generation finished"
            );

            // A generation where every worker failed would otherwise be
            // relaunched immediately.
            if report.launched > 0 && report.failed == report.launched {
                warn!(generation, "Every worker failed; backing off");
                self.sleep(self.config.idle_interval);
            }
        }

        Ok(stats)
    }

    pub fn into_store(self) -> S {
        self.store
    }
}
