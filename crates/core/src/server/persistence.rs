use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::warn;

use crate::model::{Workflow, WorkflowId};

/// Sqlite-backed snapshot store for workflows.
///
/// Each workflow persists as one row holding its full JSON snapshot; the
/// in-memory store remains the source of truth and rows are upserted after
/// every successful mutation.
#[derive(Debug, Clone)]
pub(crate) struct WorkflowsPersistence {
    db_path: PathBuf,
}

impl WorkflowsPersistence {
    pub(crate) fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).with_context(|| {
            format!(
                "failed to create data directory for workflows db: {}",
                data_dir.display()
            )
        })?;

        let persistence = Self {
            db_path: data_dir.join("workflows.db"),
        };
        persistence.initialize_schema()?;
        Ok(persistence)
    }

    pub(crate) fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn upsert_workflow(&self, workflow: &Workflow) -> Result<()> {
        let snapshot_json = serde_json::to_string(workflow)
            .context("failed to serialize workflow snapshot")?;

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO workflows (id, owner, public, name, snapshot_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    owner = excluded.owner,
                    public = excluded.public,
                    name = excluded.name,
                    snapshot_json = excluded.snapshot_json,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at",
                params![
                    workflow.id.to_string(),
                    workflow.owner,
                    workflow.public,
                    workflow.name,
                    snapshot_json,
                    workflow.created_at.to_rfc3339(),
                    workflow.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to upsert persisted workflow {}", workflow.id))?;
            Ok(())
        })
    }

    /// Restores every readable snapshot, oldest first. Rows that no longer
    /// parse are skipped with a warning rather than failing startup.
    pub(crate) fn load_workflows_for_startup(&self) -> Result<Vec<Workflow>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, snapshot_json FROM workflows ORDER BY created_at ASC, id ASC",
            )?;
            let raw_rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut workflows = Vec::new();
            for row_result in raw_rows {
                let (id, snapshot_json) = match row_result {
                    Ok(row) => row,
                    Err(err) => {
                        warn!(error = %err, "Skipping invalid persisted workflow row");
                        continue;
                    }
                };

                match serde_json::from_str::<Workflow>(&snapshot_json) {
                    Ok(workflow) => workflows.push(workflow),
                    Err(err) => {
                        warn!(workflow_id = %id, error = %err, "Skipping persisted workflow with invalid snapshot");
                    }
                }
            }

            Ok(workflows)
        })
    }

    pub(crate) fn delete_workflow(&self, id: WorkflowId) -> Result<usize> {
        self.with_connection(|conn| {
            let deleted_rows = conn
                .execute(
                    "DELETE FROM workflows WHERE id = ?1",
                    params![id.to_string()],
                )
                .with_context(|| format!("failed to delete persisted workflow {id}"))?;
            Ok(deleted_rows)
        })
    }

    fn initialize_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS workflows (
                    id TEXT PRIMARY KEY,
                    owner TEXT NOT NULL,
                    public INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    snapshot_json TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_workflows_owner ON workflows(owner);
                 CREATE INDEX IF NOT EXISTS idx_workflows_created_at ON workflows(created_at ASC);",
            )
            .with_context(|| {
                format!(
                    "failed to initialize workflows persistence schema: {}",
                    self.db_path.display()
                )
            })?;
            Ok(())
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("failed to open workflows db: {}", self.db_path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("failed to set workflows db busy timeout")?;
        op(&conn)
    }
}
