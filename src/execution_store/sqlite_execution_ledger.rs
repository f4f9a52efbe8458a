use super::models::{
    ExecutionOrder, ExecutionQuery, ExecutionRecord, ExecutionStatus, UpdateOutcome,
};
use super::schema::EXECUTION_VERSIONED_SCHEMAS;
use super::ExecutionLedger;
use crate::sqlite_persistence::open_versioned;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const SELECT_COLUMNS: &str =
    "id, job_name, status, triggered_by, started_at, completed_at, duration_ms, result, error";

pub struct SqliteExecutionLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteExecutionLedger {
    /// Open the ledger at `db_path`, creating or migrating it as needed.
    ///
    /// `busy_timeout` bounds how long a write waits on another process holding
    /// the database lock.
    pub fn new<P: AsRef<Path>>(db_path: P, busy_timeout: Duration) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), EXECUTION_VERSIONED_SCHEMAS, "execution")?;
        conn.busy_timeout(busy_timeout)?;
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))
            .context("Failed to enable WAL journal mode")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Statements are atomic, a poisoned guard is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        // Fixed-width UTC so string comparison matches time order.
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ExecutionRecord> {
        let status_str: String = row.get("status")?;
        let started_at_str: String = row.get("started_at")?;
        let completed_at_str: Option<String> = row.get("completed_at")?;
        let result_str: Option<String> = row.get("result")?;

        Ok(ExecutionRecord {
            id: row.get("id")?,
            job_name: row.get("job_name")?,
            status: ExecutionStatus::parse(&status_str).unwrap_or(ExecutionStatus::Failed),
            triggered_by: row.get("triggered_by")?,
            started_at: Self::parse_datetime(&started_at_str).unwrap_or_else(Utc::now),
            completed_at: completed_at_str.as_deref().and_then(Self::parse_datetime),
            duration_ms: row.get("duration_ms")?,
            result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get("error")?,
        })
    }

    fn serialize_result(record: &ExecutionRecord) -> Result<Option<String>> {
        record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize execution result")
    }
}

impl ExecutionLedger for SqliteExecutionLedger {
    fn insert(&self, record: &ExecutionRecord) -> Result<()> {
        if record.status == ExecutionStatus::Skipped {
            bail!("Skipped executions are not persisted (job {})", record.job_name);
        }
        let result = Self::serialize_result(record)?;
        let conn = self.conn();

        conn.execute(
            "INSERT INTO job_executions
             (id, job_name, status, triggered_by, started_at, completed_at, duration_ms, result, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.job_name,
                record.status.as_str(),
                record.triggered_by,
                Self::format_datetime(&record.started_at),
                record.completed_at.as_ref().map(Self::format_datetime),
                record.duration_ms,
                result,
                record.error,
            ],
        )
        .with_context(|| format!("Failed to insert execution {}", record.id))?;

        Ok(())
    }

    fn update(&self, record: &ExecutionRecord) -> Result<UpdateOutcome> {
        let result = Self::serialize_result(record)?;
        let conn = self.conn();

        let changed = conn
            .execute(
                "UPDATE job_executions
                 SET status = ?1, completed_at = ?2, duration_ms = ?3, result = ?4, error = ?5
                 WHERE id = ?6 AND status = ?7",
                params![
                    record.status.as_str(),
                    record.completed_at.as_ref().map(Self::format_datetime),
                    record.duration_ms,
                    result,
                    record.error,
                    record.id,
                    ExecutionStatus::Running.as_str(),
                ],
            )
            .with_context(|| format!("Failed to update execution {}", record.id))?;
        if changed > 0 {
            return Ok(UpdateOutcome::Updated);
        }

        let existing: Option<String> = conn
            .query_row(
                "SELECT status FROM job_executions WHERE id = ?1",
                params![record.id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match existing {
            Some(_) => UpdateOutcome::AlreadyFinished,
            None => UpdateOutcome::Missing,
        })
    }

    fn query(&self, query: &ExecutionQuery) -> Result<Vec<ExecutionRecord>> {
        let mut sql = format!("SELECT {} FROM job_executions", SELECT_COLUMNS);
        let mut conditions = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(job_name) = &query.job_name {
            values.push(SqlValue::Text(job_name.clone()));
            conditions.push(format!("job_name = ?{}", values.len()));
        }
        if let Some(status) = query.status {
            values.push(SqlValue::Text(status.as_str().to_string()));
            conditions.push(format!("status = ?{}", values.len()));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(match query.order {
            ExecutionOrder::NewestFirst => " ORDER BY started_at DESC",
            ExecutionOrder::OldestFirst => " ORDER BY started_at ASC",
        });
        if let Some(limit) = query.limit {
            values.push(SqlValue::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values), Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn delete_started_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        let deleted = conn.execute(
            "DELETE FROM job_executions WHERE started_at < ?1",
            params![Self::format_datetime(&cutoff)],
        )?;
        Ok(deleted)
    }

    fn mark_abandoned(
        &self,
        job_name: &str,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<usize> {
        let conn = self.conn();

        // duration_ms is computed per row from its stored start.
        let mut stmt = conn.prepare(
            "SELECT id, started_at FROM job_executions
             WHERE job_name = ?1 AND status = ?2 AND started_at < ?3",
        )?;
        let stale: Vec<(String, String)> = stmt
            .query_map(
                params![
                    job_name,
                    ExecutionStatus::Running.as_str(),
                    Self::format_datetime(&started_before)
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        let completed_at = super::now_millis();
        let mut count = 0;
        for (id, started_at_str) in stale {
            let duration_ms = Self::parse_datetime(&started_at_str)
                .map(|started| (completed_at - started).num_milliseconds());
            count += conn.execute(
                "UPDATE job_executions
                 SET status = ?1, completed_at = ?2, duration_ms = ?3, error = ?4
                 WHERE id = ?5 AND status = ?6",
                params![
                    ExecutionStatus::Failed.as_str(),
                    Self::format_datetime(&completed_at),
                    duration_ms,
                    reason,
                    id,
                    ExecutionStatus::Running.as_str(),
                ],
            )?;
        }

        Ok(count)
    }
}
