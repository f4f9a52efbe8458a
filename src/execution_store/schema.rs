//! SQLite schema definitions for the execution ledger database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Job executions
// =============================================================================

/// One row per job run that reached `running`.
///
/// `id` is generated by the writing process (UUID v4), never by the database,
/// so several processes can insert into the same file without collisions.
const JOB_EXECUTIONS_TABLE_V1: Table = Table {
    name: "job_executions",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("job_name", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("completed_at", &SqlType::Text),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("result", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[
        ("idx_job_executions_job_started", "job_name, started_at DESC"),
        ("idx_job_executions_started", "started_at"),
    ],
};

pub const EXECUTION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[JOB_EXECUTIONS_TABLE_V1],
    migration: None,
}];
