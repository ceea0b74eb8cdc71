//! The claim / evaluate / complete loop run inside each worker.

use crate::error::Result;
use crate::evaluator::Calculator;
use crate::store::{Completion, JobId, JobStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Why a worker loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    /// No claimable job was left.
    #[default]
    Empty,
    /// The per-generation job budget was spent.
    Budget,
    /// Shutdown was requested.
    Shutdown,
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub processed: usize,
    pub converged: usize,
    pub not_converged: usize,
    /// Jobs that already had output by the time this worker completed them.
    pub already_completed: usize,
    pub stopped: StopReason,
}

enum State {
    Polling,
    Processing(JobId),
    Done(StopReason),
}

/// Claims and processes jobs until the store is empty, the budget is spent,
/// or shutdown is requested.
///
/// A calculator error is not recovered from. It is returned from
/// [`run`](Self::run) and the job it was working on stays locked without
/// output until an operator unlocks it.
pub struct WorkerLoop<S, C> {
    store: S,
    calculator: C,
    worker_id: usize,
    budget: Option<usize>,
    shutdown: Arc<AtomicBool>,
}

impl<S: JobStore, C: Calculator> WorkerLoop<S, C> {
    pub fn new(store: S, calculator: C) -> Self {
        Self {
            store,
            calculator,
            worker_id: 0,
            budget: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Id used in log output.
    pub fn with_worker_id(mut self, worker_id: usize) -> Self {
        self.worker_id = worker_id;
        self
    }

    /// Stop after `budget` jobs. `None` drains the store.
    pub fn with_budget(mut self, budget: Option<usize>) -> Self {
        self.budget = budget;
        self
    }

    /// Stop claiming once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, C) {
        (self.store, self.calculator)
    }

    /// Run the loop to completion.
    #[instrument(level = "debug", skip(self), fields(worker = self.worker_id))]
    pub fn run(&mut self) -> Result<WorkerSummary> {
        let mut summary = WorkerSummary::default();
        let mut state = State::Polling;

        loop {
            state = match state {
                State::Polling => self.poll(summary.processed)?,
                State::Processing(id) => {
                    self.process(id, &mut summary)?;
                    State::Polling
                }
                State::Done(reason) => {
                    summary.stopped = reason;
                    debug!(
                        worker = self.worker_id,
                        processed = summary.processed,
                        reason = ?reason,
                        "Worker loop finished"
                    );
                    return Ok(summary);
                }
            };
        }
    }

    fn poll(&mut self, processed: usize) -> Result<State> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Ok(State::Done(StopReason::Shutdown));
        }
        if let Some(budget) = self.budget
            && processed >= budget
        {
            return Ok(State::Done(StopReason::Budget));
        }
        Ok(match self.store.claim_next()? {
            Some(id) => State::Processing(id),
            None => State::Done(StopReason::Empty),
        })
    }

    fn process(&mut self, id: JobId, summary: &mut WorkerSummary) -> Result<()> {
        let started = Instant::now();
        debug!(worker = self.worker_id, job_id = %id, "Claimed job");

        let structure = self.store.read_input(id)?;
        let outcome = self.calculator.evaluate(id, &structure)?;

        let converged = outcome.is_converged();
        let energy = outcome.energy();
        let completion = self.store.complete(id, &outcome.into_result())?;

        summary.processed += 1;
        if converged {
            summary.converged += 1;
        } else {
            summary.not_converged += 1;
        }
        if completion == Completion::AlreadyCompleted {
            summary.already_completed += 1;
            warn!(
                worker = self.worker_id,
                job_id = %id,
                "Job already had a result; kept the existing one"
            );
        }

        info!(
            worker = self.worker_id,
            job_id = %id,
            converged,
            energy,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job completed"
        );
        Ok(())
    }
}
