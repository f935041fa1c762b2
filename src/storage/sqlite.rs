//! SQLite storage implementation.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::models::*;
use crate::error::{Error, FailureDetail, Result};
use crate::steps::{StepLog, StepRecord};

/// Parse an RFC 3339 datetime string into a `chrono::DateTime<Utc>`.
///
/// Returns a `rusqlite::Error` on parse failure instead of panicking,
/// so it is safe to use inside `query_row` / `query_map` closures.
fn parse_datetime_utc(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json(s: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// SQLite-based storage.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema_sync(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema_sync(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema_sync(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- WAL for concurrent reads during writes; must precede transactions
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                definition TEXT NOT NULL,
                enabled INTEGER DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                workflow_name TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                trigger_kind TEXT NOT NULL,
                context TEXT NOT NULL,
                cursor TEXT,
                resume_at TEXT,
                parent_run_id TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                error TEXT,
                FOREIGN KEY (workflow_id) REFERENCES workflows(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS run_steps (
                run_id TEXT NOT NULL,
                step_key TEXT NOT NULL,
                result TEXT,
                wake_at TEXT,
                completed_at TEXT,
                PRIMARY KEY (run_id, step_key),
                FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs(workflow_id);
            CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
            CREATE INDEX IF NOT EXISTS idx_runs_resume ON runs(status, resume_at);
            CREATE INDEX IF NOT EXISTS idx_runs_parent ON runs(parent_run_id);
            "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // Workflow operations
    // ========================================================================

    pub async fn save_workflow(&self, workflow: &StoredWorkflow) -> Result<()> {
        let conn = self.conn.lock().await;
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM workflows WHERE name = ?1",
                [workflow.name.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing_id) = existing {
            conn.execute(
                "UPDATE workflows
                 SET definition = ?1, enabled = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![
                    workflow.definition,
                    workflow.enabled,
                    workflow.updated_at.to_rfc3339(),
                    existing_id
                ],
            )?;
        } else {
            conn.execute(
                "INSERT INTO workflows (id, name, user_id, definition, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    workflow.id,
                    workflow.name,
                    workflow.user_id,
                    workflow.definition,
                    workflow.enabled,
                    workflow.created_at.to_rfc3339(),
                    workflow.updated_at.to_rfc3339(),
                ],
            )?;
        }
        Ok(())
    }

    pub async fn get_workflow(&self, name: &str) -> Result<Option<StoredWorkflow>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, name, user_id, definition, enabled, created_at, updated_at
             FROM workflows WHERE name = ?1",
            [name],
            row_to_workflow,
        )
        .optional()
        .map_err(Error::from)
    }

    pub async fn get_workflow_by_id(&self, id: &str) -> Result<Option<StoredWorkflow>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, name, user_id, definition, enabled, created_at, updated_at
             FROM workflows WHERE id = ?1",
            [id],
            row_to_workflow,
        )
        .optional()
        .map_err(Error::from)
    }

    pub async fn list_workflows(&self) -> Result<Vec<StoredWorkflow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, user_id, definition, enabled, created_at, updated_at
             FROM workflows ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_workflow)?;
        let mut workflows = Vec::new();
        for row in rows {
            workflows.push(row?);
        }
        Ok(workflows)
    }

    pub async fn delete_workflow(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM workflows WHERE name = ?1", [name])?;
        Ok(deleted > 0)
    }

    // ========================================================================
    // Run operations
    // ========================================================================

    pub async fn save_run(&self, run: &Run) -> Result<()> {
        let conn = self.conn.lock().await;
        let error = run
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO runs
                (id, workflow_id, workflow_name, user_id, status, trigger_kind,
                 context, cursor, resume_at, parent_run_id, started_at, finished_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                context = excluded.context,
                cursor = excluded.cursor,
                resume_at = excluded.resume_at,
                finished_at = excluded.finished_at,
                error = excluded.error",
            params![
                run.id,
                run.workflow_id,
                run.workflow_name,
                run.user_id,
                run.status.to_string(),
                run.trigger_kind,
                serde_json::to_string(&run.context)?,
                run.cursor,
                run.resume_at.map(|t| t.to_rfc3339()),
                run.parent_run_id,
                run.started_at.to_rfc3339(),
                run.finished_at.map(|t| t.to_rfc3339()),
                error,
            ],
        )?;
        Ok(())
    }

    pub async fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, workflow_id, workflow_name, user_id, status, trigger_kind,
                    context, cursor, resume_at, parent_run_id, started_at, finished_at, error
             FROM runs WHERE id = ?1",
            [id],
            row_to_run,
        )
        .optional()
        .map_err(Error::from)
    }

    pub async fn list_runs(&self, workflow_name: Option<&str>, limit: usize) -> Result<Vec<Run>> {
        let conn = self.conn.lock().await;
        let limit = limit.clamp(1, 1000) as i64;

        let mut runs = Vec::new();
        match workflow_name {
            Some(name) => {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow_id, workflow_name, user_id, status, trigger_kind,
                            context, cursor, resume_at, parent_run_id, started_at, finished_at, error
                     FROM runs WHERE workflow_name = ?1
                     ORDER BY started_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![name, limit], row_to_run)?;
                for row in rows {
                    runs.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow_id, workflow_name, user_id, status, trigger_kind,
                            context, cursor, resume_at, parent_run_id, started_at, finished_at, error
                     FROM runs ORDER BY started_at DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], row_to_run)?;
                for row in rows {
                    runs.push(row?);
                }
            }
        }
        Ok(runs)
    }

    /// Top-level WAITING runs whose wake time has passed, oldest first.
    ///
    /// Nested runs are excluded: their parent drives them, and a second
    /// driver would race it.
    pub async fn due_waiting_runs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Run>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, workflow_id, workflow_name, user_id, status, trigger_kind,
                    context, cursor, resume_at, parent_run_id, started_at, finished_at, error
             FROM runs
             WHERE status = 'waiting' AND resume_at IS NOT NULL AND resume_at <= ?1
               AND parent_run_id IS NULL
             ORDER BY resume_at ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![now.to_rfc3339(), limit as i64], row_to_run)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }
}

#[async_trait]
impl StepLog for SqliteStorage {
    async fn load_step(&self, run_id: &str, step_key: &str) -> Result<Option<StepRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT step_key, result, wake_at, completed_at
             FROM run_steps WHERE run_id = ?1 AND step_key = ?2",
            params![run_id, step_key],
            |row| {
                let result: Option<String> = row.get(1)?;
                let wake_at: Option<String> = row.get(2)?;
                let completed_at: Option<String> = row.get(3)?;
                Ok(StepRecord {
                    step_key: row.get(0)?,
                    result: result.as_deref().map(parse_json).transpose()?,
                    wake_at: wake_at.as_deref().map(parse_datetime_utc).transpose()?,
                    completed_at: completed_at
                        .as_deref()
                        .map(parse_datetime_utc)
                        .transpose()?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    async fn save_step(&self, run_id: &str, record: &StepRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        let result = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO run_steps (run_id, step_key, result, wake_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(run_id, step_key) DO UPDATE SET
                result = excluded.result,
                wake_at = excluded.wake_at,
                completed_at = excluded.completed_at",
            params![
                run_id,
                record.step_key,
                result,
                record.wake_at.map(|t| t.to_rfc3339()),
                record.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }
}

fn row_to_workflow(row: &Row<'_>) -> rusqlite::Result<StoredWorkflow> {
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(StoredWorkflow {
        id: row.get(0)?,
        name: row.get(1)?,
        user_id: row.get(2)?,
        definition: row.get(3)?,
        enabled: row.get(4)?,
        created_at: parse_datetime_utc(&created_at)?,
        updated_at: parse_datetime_utc(&updated_at)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    let status: String = row.get(4)?;
    let context: String = row.get(6)?;
    let resume_at: Option<String> = row.get(8)?;
    let started_at: String = row.get(10)?;
    let finished_at: Option<String> = row.get(11)?;
    let error: Option<String> = row.get(12)?;

    Ok(Run {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        workflow_name: row.get(2)?,
        user_id: row.get(3)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?,
        trigger_kind: row.get(5)?,
        context: parse_json(&context)?,
        cursor: row.get(7)?,
        resume_at: resume_at.as_deref().map(parse_datetime_utc).transpose()?,
        parent_run_id: row.get(9)?,
        started_at: parse_datetime_utc(&started_at)?,
        finished_at: finished_at.as_deref().map(parse_datetime_utc).transpose()?,
        error: error
            .as_deref()
            .map(|e| {
                serde_json::from_str::<FailureDetail>(e).map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(
                        12,
                        rusqlite::types::Type::Text,
                        Box::new(err),
                    )
                })
            })
            .transpose()?,
    })
}
