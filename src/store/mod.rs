//! Job store abstraction for the claim/complete protocol.
//!
//! Workers never read-then-lock. Every state change goes through one of the
//! atomic operations on [`JobStore`], so many processes can share one store
//! without in-process locking.
//!
//! The SQLite implementation lives in [`sqlite`]; the raw queries are in
//! [`crate::db::queries`].

pub mod sqlite;

use crate::error::{RelaxError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use sqlite::SqliteStore;

/// Energy recorded for jobs whose relaxation did not converge.
pub const NOT_CONVERGED_ENERGY: f64 = 622427.0;

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    /// Wrap a raw row id.
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw row id.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = RelaxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().parse::<i64>() {
            Ok(raw) if raw > 0 => Ok(Self(raw)),
            _ => Err(RelaxError::InvalidJobId(s.to_string())),
        }
    }
}

/// Output payload stored on a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    /// Final energy, or [`NOT_CONVERGED_ENERGY`] when the relaxation failed.
    pub energy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forces: Option<Vec<[f64; 3]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_group: Option<String>,
    pub converged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u64>,
}

/// Result written back by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub properties: Properties,
    /// Relaxed structure; replaces the input payload when present.
    pub structure: Option<Value>,
}

/// Outcome of [`JobStore::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The result was written and the lock released.
    Written,
    /// The job already had output. The payload was left untouched and the
    /// lock released.
    AlreadyCompleted,
}

/// Derived display state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Eligible, unlocked, no output.
    Pending,
    /// Locked without output: running, or stuck if its worker died.
    Locked,
    /// Has output.
    Completed,
    /// Not flagged for the queue and no output.
    Ineligible,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Locked => write!(f, "locked"),
            Self::Completed => write!(f, "completed"),
            Self::Ineligible => write!(f, "ineligible"),
        }
    }
}

/// Store operations the worker protocol relies on.
///
/// `claim_next` and `complete` must be atomic against the store itself;
/// implementations may not emulate them with a separate read and write.
pub trait JobStore {
    /// Advisory check for at least one claimable job. Not atomic.
    fn has_claimable(&self) -> Result<bool>;

    /// Atomically select one eligible, unlocked, empty-output job and lock it.
    fn claim_next(&mut self) -> Result<Option<JobId>>;

    /// Read a job's input payload.
    fn read_input(&self, id: JobId) -> Result<Value>;

    /// Write a result without touching the lock. Returns `false` if the job
    /// already had output.
    fn write_result(&mut self, id: JobId, result: &JobResult) -> Result<bool>;

    /// Clear the lock flag.
    fn unlock(&mut self, id: JobId) -> Result<()>;

    /// Write the result and clear the lock in one atomic step.
    fn complete(&mut self, id: JobId, result: &JobResult) -> Result<Completion>;

    /// Clear the lock of a job in this store's queue regardless of who set
    /// it. Returns `false` if the job was not locked; jobs of other queues
    /// are refused.
    fn force_unlock(&mut self, id: JobId) -> Result<bool>;

    /// Force-unlock every locked job of this store's queue without output
    /// whose lock is older than `older_than`.
    fn sweep_stuck(&mut self, older_than: Duration) -> Result<Vec<JobId>>;
}
