//! Job store queries: enqueue, claim, complete, unlock and inspection.

use crate::error::{RelaxError, Result};
use crate::store::{Completion, JobId, JobResult, JobState, Properties};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Derived state of a job relative to queue `?1`.
const STATE_EXPR: &str = r#"
    CASE
        WHEN j.properties IS NOT NULL THEN 'completed'
        WHEN j.locked = 1 THEN 'locked'
        WHEN EXISTS (SELECT 1 FROM job_flags f WHERE f.job_id = j.id AND f.flag = ?1) THEN 'pending'
        ELSE 'ineligible'
    END
"#;

/// A job row as seen by operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    pub structure: Value,
    pub properties: Option<Properties>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Parse a row selected with the `state` column.
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let state: String = row.get("state")?;
        let state = match state.as_str() {
            "completed" => JobState::Completed,
            "locked" => JobState::Locked,
            "pending" => JobState::Pending,
            _ => JobState::Ineligible,
        };

        let structure: String = row.get("structure")?;
        let properties: Option<String> = row.get("properties")?;

        Ok(Self {
            id: JobId::new(row.get("id")?),
            state,
            structure: parse_json_column(&structure)?,
            properties: properties.as_deref().map(parse_json_column).transpose()?,
            locked_at: row.get::<_, Option<i64>>("locked_at")?.and_then(timestamp),
            created_at: timestamp(row.get("created_at")?).unwrap_or_default(),
            completed_at: row
                .get::<_, Option<i64>>("completed_at")?
                .and_then(timestamp),
        })
    }

    /// Energy from the output payload, if completed.
    pub fn energy(&self) -> Option<f64> {
        self.properties.as_ref().map(|p| p.energy)
    }
}

/// Per-queue counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: String,
    pub total: i64,
    pub pending: i64,
    pub locked: i64,
    pub completed: i64,
    pub not_converged: i64,
    pub ineligible: i64,
    /// When the longest-held lock without output was taken.
    pub oldest_lock: Option<DateTime<Utc>>,
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn parse_json_column<T: serde::de::DeserializeOwned>(text: &str) -> rusqlite::Result<T> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn ensure_exists(conn: &Connection, id: JobId) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM jobs WHERE id = ?1)",
        [id.get()],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(RelaxError::JobNotFound(id.get()))
    }
}

/// Insert a new job with the given status flags set.
pub fn insert_job(
    conn: &mut Connection,
    structure: &Value,
    flags: &[String],
    now: DateTime<Utc>,
) -> Result<JobId> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO jobs (structure, created_at) VALUES (?1, ?2)",
        params![serde_json::to_string(structure)?, now.timestamp()],
    )?;
    let id = JobId::new(tx.last_insert_rowid());
    {
        let mut stmt =
            tx.prepare("INSERT OR IGNORE INTO job_flags (job_id, flag) VALUES (?1, ?2)")?;
        for flag in flags {
            stmt.execute(params![id.get(), flag])?;
        }
    }
    tx.commit()?;
    Ok(id)
}

/// Check whether any job is claimable from `queue`.
pub fn has_claimable(conn: &Connection, queue: &str) -> Result<bool> {
    let found: bool = conn.query_row(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM jobs j
            JOIN job_flags f ON f.job_id = j.id AND f.flag = ?1
            WHERE j.locked = 0 AND j.properties IS NULL
        )
        "#,
        [queue],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// Atomically select the lowest-id claimable job from `queue` and lock it.
///
/// The select and the lock are one conditional `UPDATE` run under
/// `BEGIN IMMEDIATE`, so the write lock is held from selection to commit.
pub fn claim_next(
    conn: &mut Connection,
    queue: &str,
    now: DateTime<Utc>,
) -> Result<Option<JobId>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let claimed: Option<i64> = tx
        .query_row(
            r#"
            UPDATE jobs SET locked = 1, locked_at = ?2
            WHERE id = (
                SELECT j.id FROM jobs j
                JOIN job_flags f ON f.job_id = j.id AND f.flag = ?1
                WHERE j.locked = 0 AND j.properties IS NULL
                ORDER BY j.id
                LIMIT 1
            )
            AND locked = 0 AND properties IS NULL
            RETURNING id
            "#,
            params![queue, now.timestamp()],
            |row| row.get(0),
        )
        .optional()?;
    tx.commit()?;
    Ok(claimed.map(JobId::new))
}

/// Read a job's input payload.
pub fn read_input(conn: &Connection, id: JobId) -> Result<Value> {
    let text: Option<String> = conn
        .query_row(
            "SELECT structure FROM jobs WHERE id = ?1",
            [id.get()],
            |row| row.get(0),
        )
        .optional()?;
    let text = text.ok_or(RelaxError::JobNotFound(id.get()))?;
    Ok(serde_json::from_str(&text)?)
}

/// Write a result if the job has no output yet. Returns whether it was written.
pub fn write_result(
    conn: &Connection,
    id: JobId,
    result: &JobResult,
    now: DateTime<Utc>,
) -> Result<bool> {
    ensure_exists(conn, id)?;
    let properties = serde_json::to_string(&result.properties)?;
    let structure = result
        .structure
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let updated = conn.execute(
        r#"
        UPDATE jobs
        SET properties = ?2,
            structure = COALESCE(?3, structure),
            completed_at = ?4
        WHERE id = ?1 AND properties IS NULL
        "#,
        params![id.get(), properties, structure, now.timestamp()],
    )?;
    Ok(updated == 1)
}

/// Clear the lock flag of a job.
pub fn unlock(conn: &Connection, id: JobId) -> Result<()> {
    let updated = conn.execute(
        "UPDATE jobs SET locked = 0, locked_at = NULL WHERE id = ?1",
        [id.get()],
    )?;
    if updated == 0 {
        return Err(RelaxError::JobNotFound(id.get()));
    }
    Ok(())
}

/// Write the result and release the lock in one transaction.
pub fn complete(
    conn: &mut Connection,
    id: JobId,
    result: &JobResult,
    now: DateTime<Utc>,
) -> Result<Completion> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let written = write_result(&tx, id, result, now)?;
    unlock(&tx, id)?;
    tx.commit()?;
    Ok(if written {
        Completion::Written
    } else {
        Completion::AlreadyCompleted
    })
}

fn ensure_in_queue(conn: &Connection, queue: &str, id: JobId) -> Result<()> {
    ensure_exists(conn, id)?;
    let flagged: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM job_flags WHERE job_id = ?1 AND flag = ?2)",
        params![id.get(), queue],
        |row| row.get(0),
    )?;
    if flagged {
        Ok(())
    } else {
        Err(RelaxError::NotInQueue {
            job: id.get(),
            queue: queue.to_string(),
        })
    }
}

/// Release a lock on a job of `queue` without writing a result.
/// Returns `false` if it was not locked.
pub fn force_unlock(conn: &Connection, queue: &str, id: JobId) -> Result<bool> {
    ensure_in_queue(conn, queue, id)?;
    let updated = conn.execute(
        "UPDATE jobs SET locked = 0, locked_at = NULL WHERE id = ?1 AND locked = 1",
        [id.get()],
    )?;
    Ok(updated == 1)
}

/// Release every lock without output on a job of `queue` taken at or
/// before `cutoff`.
pub fn sweep_stuck(
    conn: &mut Connection,
    queue: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<JobId>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let ids = {
        let mut stmt = tx.prepare(
            r#"
            UPDATE jobs SET locked = 0, locked_at = NULL
            WHERE locked = 1 AND properties IS NULL AND locked_at <= ?2
              AND EXISTS (
                  SELECT 1 FROM job_flags f WHERE f.job_id = jobs.id AND f.flag = ?1
              )
            RETURNING id
            "#,
        )?;
        let rows = stmt.query_map(params![queue, cutoff.timestamp()], |row| {
            row.get::<_, i64>(0)
        })?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(JobId::new(row?));
        }
        ids.sort();
        ids
    };
    tx.commit()?;
    Ok(ids)
}

/// Fetch one job.
pub fn get_job(conn: &Connection, queue: &str, id: JobId) -> Result<JobRecord> {
    let sql = format!(
        "SELECT j.*, {STATE_EXPR} AS state FROM jobs j WHERE j.id = ?2"
    );
    conn.query_row(&sql, params![queue, id.get()], JobRecord::from_row)
        .optional()?
        .ok_or(RelaxError::JobNotFound(id.get()))
}

/// List jobs in id order, optionally filtered by state. `limit == 0` means all.
pub fn list_jobs(
    conn: &Connection,
    queue: &str,
    state: Option<JobState>,
    limit: usize,
) -> Result<Vec<JobRecord>> {
    let sql = format!(
        r#"
        SELECT * FROM (
            SELECT j.*, {STATE_EXPR} AS state FROM jobs j
        )
        WHERE ?2 IS NULL OR state = ?2
        ORDER BY id
        LIMIT ?3
        "#
    );
    let state = state.map(|s| s.to_string());
    let limit: i64 = if limit == 0 { -1 } else { limit as i64 };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![queue, state, limit], JobRecord::from_row)?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Count jobs per state for `queue`.
pub fn queue_stats(conn: &Connection, queue: &str) -> Result<QueueStats> {
    let sql = format!(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(state = 'pending'), 0),
            COALESCE(SUM(state = 'locked'), 0),
            COALESCE(SUM(state = 'completed'), 0),
            COALESCE(SUM(state = 'completed' AND json_extract(properties, '$.converged') = 0), 0),
            COALESCE(SUM(state = 'ineligible'), 0),
            MIN(CASE WHEN state = 'locked' THEN locked_at END)
        FROM (
            SELECT j.properties, j.locked_at, {STATE_EXPR} AS state FROM jobs j
        )
        "#
    );
    let stats = conn.query_row(&sql, [queue], |row| {
        Ok(QueueStats {
            queue: queue.to_string(),
            total: row.get(0)?,
            pending: row.get(1)?,
            locked: row.get(2)?,
            completed: row.get(3)?,
            not_converged: row.get(4)?,
            ineligible: row.get(5)?,
            oldest_lock: row.get::<_, Option<i64>>(6)?.and_then(timestamp),
        })
    })?;
    Ok(stats)
}
