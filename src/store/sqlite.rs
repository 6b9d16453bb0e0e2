//! SQLite-backed store.
//!
//! Records are stored as JSON documents keyed by their natural id, one
//! table per record family. Every write is a single upsert, which gives the
//! atomic single-record update the engines rely on.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::flow::Answer;
use crate::sync::{QueuedUpload, SyncCursor};
use crate::task::{StudyTask, TaskId};

use super::{LocalStore, StoreError};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    definition_id TEXT NOT NULL,
    state TEXT NOT NULL,
    window_start TEXT NOT NULL,
    record TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_definition ON tasks(definition_id);
CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);

CREATE TABLE IF NOT EXISTS flow_answers (
    flow_id TEXT PRIMARY KEY NOT NULL,
    record TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_cursors (
    data_type TEXT PRIMARY KEY NOT NULL,
    record TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS queued_uploads (
    id TEXT PRIMARY KEY NOT NULL,
    data_type TEXT NOT NULL,
    range_start TEXT NOT NULL,
    record TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_uploads_type ON queued_uploads(data_type, range_start);
"#;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database under `base_dir`.
    pub async fn open(base_dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&base_dir).await?;
        let db_path = base_dir.join("studysync.db");

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Background(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn now_string() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn put_task(&self, task: &StudyTask) -> Result<(), StoreError> {
        let record = serde_json::to_string(task)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks (id, definition_id, state, window_start, record, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 definition_id = excluded.definition_id,
                 state = excluded.state,
                 window_start = excluded.window_start,
                 record = excluded.record,
                 updated_at = excluded.updated_at",
            params![
                task.id().to_string(),
                task.definition_id(),
                task.state().as_str(),
                task.window().start.to_rfc3339(),
                record,
                Self::now_string(),
            ],
        )?;
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<StudyTask>, StoreError> {
        let conn = self.conn.lock().await;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM tasks WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match record {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn list_tasks(&self) -> Result<Vec<StudyTask>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT record FROM tasks ORDER BY window_start, id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(serde_json::from_str(&row?)?);
        }
        Ok(tasks)
    }

    async fn remove_task(&self, id: TaskId) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])?;
        Ok(changed > 0)
    }

    async fn put_answers(&self, flow_id: &str, answers: &[Answer]) -> Result<(), StoreError> {
        let record = serde_json::to_string(answers)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO flow_answers (flow_id, record, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(flow_id) DO UPDATE SET
                 record = excluded.record,
                 updated_at = excluded.updated_at",
            params![flow_id, record, Self::now_string()],
        )?;
        Ok(())
    }

    async fn get_answers(&self, flow_id: &str) -> Result<Vec<Answer>, StoreError> {
        let conn = self.conn.lock().await;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM flow_answers WHERE flow_id = ?1",
                params![flow_id],
                |row| row.get(0),
            )
            .optional()?;
        match record {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn put_cursor(&self, cursor: &SyncCursor) -> Result<(), StoreError> {
        let record = serde_json::to_string(cursor)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sync_cursors (data_type, record, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(data_type) DO UPDATE SET
                 record = excluded.record,
                 updated_at = excluded.updated_at",
            params![cursor.data_type(), record, Self::now_string()],
        )?;
        Ok(())
    }

    async fn get_cursor(&self, data_type: &str) -> Result<Option<SyncCursor>, StoreError> {
        let conn = self.conn.lock().await;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM sync_cursors WHERE data_type = ?1",
                params![data_type],
                |row| row.get(0),
            )
            .optional()?;
        match record {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_upload(&self, upload: &QueuedUpload) -> Result<(), StoreError> {
        let record = serde_json::to_string(upload)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO queued_uploads (id, data_type, range_start, record, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 data_type = excluded.data_type,
                 range_start = excluded.range_start,
                 record = excluded.record,
                 updated_at = excluded.updated_at",
            params![
                upload.id().to_string(),
                upload.data_type(),
                upload.range().start.to_rfc3339(),
                record,
                Self::now_string(),
            ],
        )?;
        Ok(())
    }

    async fn list_uploads(&self) -> Result<Vec<QueuedUpload>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT record FROM queued_uploads ORDER BY data_type, range_start")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut uploads = Vec::new();
        for row in rows {
            uploads.push(serde_json::from_str(&row?)?);
        }
        Ok(uploads)
    }

    async fn remove_upload(&self, id: Uuid) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "DELETE FROM queued_uploads WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }
}
