//! SQLite-backed [`JobStore`].

use super::{Completion, JobId, JobResult, JobStore};
use crate::db::queries::{self, JobRecord, QueueStats};
use crate::db::Database;
use crate::error::{RelaxError, Result};
use crate::store::JobState;
use chrono::Utc;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

/// A job store bound to one queue tag.
pub struct SqliteStore {
    db: Database,
    queue: String,
}

impl SqliteStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        queue: impl Into<String>,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            db: Database::open(path, busy_timeout)?,
            queue: queue.into(),
        })
    }

    /// Open a store that must already exist.
    pub fn open_existing<P: AsRef<Path>>(
        path: P,
        queue: impl Into<String>,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RelaxError::NoStore(path.display().to_string()));
        }
        Self::open(path, queue, busy_timeout)
    }

    /// Enqueue a structure, flagged for this queue plus `extra_flags`.
    pub fn insert(&mut self, structure: &Value, extra_flags: &[String]) -> Result<JobId> {
        let mut flags = Vec::with_capacity(extra_flags.len() + 1);
        flags.push(self.queue.clone());
        flags.extend(extra_flags.iter().cloned());
        queries::insert_job(self.db.connection_mut(), structure, &flags, Utc::now())
    }

    /// Fetch one job.
    pub fn get(&self, id: JobId) -> Result<JobRecord> {
        queries::get_job(self.db.connection(), &self.queue, id)
    }

    /// List jobs, optionally by state. `limit == 0` lists all.
    pub fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobRecord>> {
        queries::list_jobs(self.db.connection(), &self.queue, state, limit)
    }

    /// Counts per state.
    pub fn stats(&self) -> Result<QueueStats> {
        queries::queue_stats(self.db.connection(), &self.queue)
    }
}

impl JobStore for SqliteStore {
    fn has_claimable(&self) -> Result<bool> {
        queries::has_claimable(self.db.connection(), &self.queue)
    }

    #[instrument(level = "trace", skip(self), fields(queue = %self.queue))]
    fn claim_next(&mut self) -> Result<Option<JobId>> {
        queries::claim_next(self.db.connection_mut(), &self.queue, Utc::now())
    }

    fn read_input(&self, id: JobId) -> Result<Value> {
        queries::read_input(self.db.connection(), id)
    }

    fn write_result(&mut self, id: JobId, result: &JobResult) -> Result<bool> {
        queries::write_result(self.db.connection(), id, result, Utc::now())
    }

    fn unlock(&mut self, id: JobId) -> Result<()> {
        queries::unlock(self.db.connection(), id)
    }

    fn complete(&mut self, id: JobId, result: &JobResult) -> Result<Completion> {
        queries::complete(self.db.connection_mut(), id, result, Utc::now())
    }

    fn force_unlock(&mut self, id: JobId) -> Result<bool> {
        let released = queries::force_unlock(self.db.connection(), &self.queue, id)?;
        debug!(job_id = %id, released, "Force unlock");
        Ok(released)
    }

    fn sweep_stuck(&mut self, older_than: Duration) -> Result<Vec<JobId>> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| RelaxError::Config(format!("Invalid lock age: {}", e)))?;
        queries::sweep_stuck(self.db.connection_mut(), &self.queue, Utc::now() - age)
    }
}
