//! Job repository for the `receipt_jobs` table, and the `JobStore` built on it.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::worker::job::{JobRecord, JobState, ReceiptJobPayload};
use crate::worker::store::JobStore;
use crate::worker::QueueError;

/// A raw row, before JSON and timestamp columns are decoded.
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    payload: String,
    state: String,
    progress: u8,
    attempts_made: u32,
    max_attempts: u32,
    result: Option<String>,
    failed_reason: Option<String>,
    created_at: String,
    updated_at: String,
    run_at: String,
    finished_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            payload: row.get("payload")?,
            state: row.get("state")?,
            progress: row.get("progress")?,
            attempts_made: row.get("attempts_made")?,
            max_attempts: row.get("max_attempts")?,
            result: row.get("result")?,
            failed_reason: row.get("failed_reason")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            run_at: row.get("run_at")?,
            finished_at: row.get("finished_at")?,
        })
    }

    fn into_record(self) -> Result<JobRecord, DatabaseError> {
        let payload: ReceiptJobPayload =
            serde_json::from_str(&self.payload).map_err(|e| invalid("payload", e))?;
        let result = self
            .result
            .as_deref()
            .map(|raw| serde_json::from_str::<serde_json::Value>(raw))
            .transpose()
            .map_err(|e| invalid("result", e))?;

        Ok(JobRecord {
            id: self.id,
            payload,
            state: self.state.parse().map_err(|e| invalid("state", e))?,
            progress: self.progress,
            attempts_made: self.attempts_made,
            max_attempts: self.max_attempts,
            result,
            failed_reason: self.failed_reason,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
            run_at: parse_ts("run_at", &self.run_at)?,
            finished_at: self
                .finished_at
                .as_deref()
                .map(|v| parse_ts("finished_at", v))
                .transpose()?,
        })
    }
}

fn invalid(column: &'static str, reason: impl ToString) -> DatabaseError {
    DatabaseError::InvalidColumn {
        column,
        reason: reason.to_string(),
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid(column, e))
}

fn encode(record: &JobRecord) -> Result<(String, Option<String>), DatabaseError> {
    let payload = serde_json::to_string(&record.payload).map_err(|e| invalid("payload", e))?;
    let result = record
        .result
        .as_ref()
        .map(|value| serde_json::to_string(value))
        .transpose()
        .map_err(|e| invalid("result", e))?;
    Ok((payload, result))
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<JobRecord>, DatabaseError> {
    conn.query_row(
        "SELECT * FROM receipt_jobs WHERE id = ?1",
        params![id],
        JobRow::from_row,
    )
    .optional()?
    .map(JobRow::into_record)
    .transpose()
}

pub fn insert(db: &Database, record: &JobRecord) -> Result<(), DatabaseError> {
    let (payload, result) = encode(record)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO receipt_jobs (id, payload, user_id, state, progress, attempts_made,
             max_attempts, result, failed_reason, created_at, updated_at, run_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.id,
                payload,
                record.payload.user_id,
                record.state.as_str(),
                record.progress,
                record.attempts_made,
                record.max_attempts,
                result,
                record.failed_reason,
                ts(record.created_at),
                ts(record.updated_at),
                ts(record.run_at),
                record.finished_at.map(ts),
            ],
        )?;
        Ok(())
    })
}

/// Overwrites everything except `id`, `payload` and `created_at`. Progress
/// only moves up.
pub fn save(db: &Database, record: &JobRecord) -> Result<(), DatabaseError> {
    let (_, result) = encode(record)?;
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE receipt_jobs SET state=?2, progress=MAX(progress, ?3), attempts_made=?4,
             max_attempts=?5, result=?6, failed_reason=?7, updated_at=?8, run_at=?9,
             finished_at=?10
             WHERE id=?1",
            params![
                record.id,
                record.state.as_str(),
                record.progress,
                record.attempts_made,
                record.max_attempts,
                result,
                record.failed_reason,
                ts(record.updated_at),
                ts(record.run_at),
                record.finished_at.map(ts),
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRecord>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, id))
}

/// Claims the oldest ready job in one transaction under the connection lock.
pub fn claim_next(db: &Database, now: DateTime<Utc>) -> Result<Option<JobRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let id: Option<String> = tx
            .query_row(
                "SELECT id FROM receipt_jobs
                 WHERE state IN ('waiting', 'delayed') AND run_at <= ?1
                 ORDER BY run_at, created_at LIMIT 1",
                params![ts(now)],
                |r| r.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE receipt_jobs SET state = 'active', attempts_made = attempts_made + 1,
             updated_at = ?2 WHERE id = ?1",
            params![id, ts(now)],
        )?;
        let claimed = find_in(&tx, &id)?;
        tx.commit()?;
        Ok(claimed)
    })
}

/// Returns jobs left `active` by a previous process to the waiting state.
pub fn requeue_interrupted(db: &Database, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let requeued = conn.execute(
            "UPDATE receipt_jobs SET state = 'waiting', run_at = ?1, updated_at = ?1
             WHERE state = 'active'",
            params![ts(now)],
        )?;
        Ok(requeued)
    })
}

/// `Ok(None)` when the job does not exist, otherwise whether progress rose.
pub fn raise_progress(db: &Database, id: &str, progress: u8) -> Result<Option<bool>, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE receipt_jobs SET progress = ?2, updated_at = ?3
             WHERE id = ?1 AND progress < ?2 AND state NOT IN ('completed', 'failed')",
            params![id, progress, ts(Utc::now())],
        )?;
        if changed > 0 {
            return Ok(Some(true));
        }
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM receipt_jobs WHERE id = ?1)",
            params![id],
            |r| r.get(0),
        )?;
        Ok(exists.then_some(false))
    })
}

pub fn next_run_at(db: &Database) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    let raw: Option<String> = db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT MIN(run_at) FROM receipt_jobs WHERE state IN ('waiting', 'delayed')",
            [],
            |r| r.get(0),
        )?)
    })?;
    raw.as_deref().map(|v| parse_ts("run_at", v)).transpose()
}

pub fn purge_finished(db: &Database, older_than: DateTime<Utc>) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM receipt_jobs
             WHERE state IN ('completed', 'failed') AND finished_at IS NOT NULL AND finished_at < ?1",
            params![ts(older_than)],
        )?;
        Ok(removed)
    })
}

pub fn count_by_state(db: &Database, state: JobState) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM receipt_jobs WHERE state = ?1",
            params![state.as_str()],
            |r| r.get(0),
        )?;
        Ok(count.max(0) as usize)
    })
}

/// Most recent jobs submitted by a user, newest first.
pub fn recent_for_user(db: &Database, user_id: &str, limit: u32) -> Result<Vec<JobRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM receipt_jobs WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(JobRow::into_record).collect()
    })
}

/// Durable `JobStore` over the `receipt_jobs` table.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Requeues jobs a crashed process left active. Call before workers start.
    pub fn recover_interrupted(&self) -> Result<usize, QueueError> {
        let requeued = requeue_interrupted(&self.db, Utc::now())?;
        if requeued > 0 {
            log::info!("Requeued {} interrupted receipt jobs", requeued);
        }
        Ok(requeued)
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, record: &JobRecord) -> Result<(), QueueError> {
        Ok(insert(&self.db, record)?)
    }

    fn get(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        Ok(find_by_id(&self.db, id)?)
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>, QueueError> {
        Ok(claim_next(&self.db, now)?)
    }

    fn save(&self, record: &JobRecord) -> Result<(), QueueError> {
        Ok(save(&self.db, record)?)
    }

    fn raise_progress(&self, id: &str, progress: u8) -> Result<bool, QueueError> {
        raise_progress(&self.db, id, progress)?.ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    fn next_run_at(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        Ok(next_run_at(&self.db)?)
    }

    fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize, QueueError> {
        Ok(purge_finished(&self.db, older_than)?)
    }

    fn count_by_state(&self, state: JobState) -> Result<usize, QueueError> {
        Ok(count_by_state(&self.db, state)?)
    }
}
