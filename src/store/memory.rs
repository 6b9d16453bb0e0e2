//! In-memory store (non-persistent).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::flow::Answer;
use crate::sync::{QueuedUpload, SyncCursor};
use crate::task::{StudyTask, TaskId};

use super::{LocalStore, StoreError};

#[derive(Clone, Default)]
pub struct MemoryStore {
    tasks: Arc<RwLock<HashMap<TaskId, StudyTask>>>,
    answers: Arc<RwLock<HashMap<String, Vec<Answer>>>>,
    cursors: Arc<RwLock<HashMap<String, SyncCursor>>>,
    uploads: Arc<RwLock<HashMap<Uuid, QueuedUpload>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn put_task(&self, task: &StudyTask) -> Result<(), StoreError> {
        self.tasks.write().await.insert(task.id(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<StudyTask>, StoreError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<StudyTask>, StoreError> {
        let mut tasks: Vec<StudyTask> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| (t.window().start, t.id().as_uuid()));
        Ok(tasks)
    }

    async fn remove_task(&self, id: TaskId) -> Result<bool, StoreError> {
        Ok(self.tasks.write().await.remove(&id).is_some())
    }

    async fn put_answers(&self, flow_id: &str, answers: &[Answer]) -> Result<(), StoreError> {
        self.answers
            .write()
            .await
            .insert(flow_id.to_string(), answers.to_vec());
        Ok(())
    }

    async fn get_answers(&self, flow_id: &str) -> Result<Vec<Answer>, StoreError> {
        Ok(self
            .answers
            .read()
            .await
            .get(flow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_cursor(&self, cursor: &SyncCursor) -> Result<(), StoreError> {
        self.cursors
            .write()
            .await
            .insert(cursor.data_type().to_string(), cursor.clone());
        Ok(())
    }

    async fn get_cursor(&self, data_type: &str) -> Result<Option<SyncCursor>, StoreError> {
        Ok(self.cursors.read().await.get(data_type).cloned())
    }

    async fn put_upload(&self, upload: &QueuedUpload) -> Result<(), StoreError> {
        self.uploads
            .write()
            .await
            .insert(upload.id(), upload.clone());
        Ok(())
    }

    async fn list_uploads(&self) -> Result<Vec<QueuedUpload>, StoreError> {
        let mut uploads: Vec<QueuedUpload> =
            self.uploads.read().await.values().cloned().collect();
        uploads.sort_by_key(|u| (u.data_type().to_string(), u.range().start));
        Ok(uploads)
    }

    async fn remove_upload(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.uploads.write().await.remove(&id).is_some())
    }
}
