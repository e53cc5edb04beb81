//! In-memory board backend
//!
//! Keeps boards in process memory with the hosted backend's ordering rules:
//! every task carries an `order` that is renumbered on moves and deletes,
//! and column keys are generated and unique per board.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::BoardBackend;
use crate::board::{BoardTask, ColumnMeta, TaskDraft, TaskMove, TaskRecord};
use crate::{Error, Result};

const DEFAULT_COLUMN_COLOR: &str = "#gray";

#[derive(Debug, Default)]
struct StoredBoard {
    columns: Vec<ColumnMeta>,
    tasks: Vec<TaskRecord>,
}

impl StoredBoard {
    fn column(&self, key: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|column| column.key == key)
    }

    fn next_column_order(&self) -> i64 {
        self.columns
            .iter()
            .map(|column| column.order + 1)
            .max()
            .unwrap_or(0)
    }

    fn next_task_order(&self, column_key: &str) -> i64 {
        self.tasks
            .iter()
            .filter(|record| record.column_key == column_key)
            .map(|record| record.task.order + 1)
            .max()
            .unwrap_or(0)
    }

    fn task_position(&self, task_id: &str) -> Option<usize> {
        self.tasks
            .iter()
            .position(|record| record.task.id == task_id)
    }
}

/// Process-local backend, shared by cloning
#[derive(Clone, Default)]
pub struct MemoryBackend {
    boards: Arc<RwLock<HashMap<String, StoredBoard>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column under a chosen key
    pub async fn add_column(&self, board_id: &str, key: &str, name: &str) -> Result<ColumnMeta> {
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            return Err(Error::InvalidInput("Column key is required".to_string()));
        }

        let mut boards = self.boards.write().await;
        let board = boards.entry(board_id.to_string()).or_default();
        if board.column(&key).is_some() {
            return Err(Error::Conflict(format!(
                "Column key '{}' already exists on board {}",
                key, board_id
            )));
        }

        let column = ColumnMeta::new(key, name.trim())
            .with_id(Uuid::new_v4().simple().to_string())
            .with_order(board.next_column_order());
        board.columns.push(column.clone());
        Ok(column)
    }

    /// Make every call fail, as if the backend were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Backend("backend unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BoardBackend for MemoryBackend {
    async fn fetch_columns(&self, board_id: &str) -> Result<Vec<ColumnMeta>> {
        self.check_online()?;
        let boards = self.boards.read().await;
        let mut columns = boards
            .get(board_id)
            .map(|board| board.columns.clone())
            .unwrap_or_default();
        columns.sort_by_key(|column| column.order);
        Ok(columns)
    }

    async fn fetch_tasks(&self, board_id: &str) -> Result<Vec<TaskRecord>> {
        self.check_online()?;
        let boards = self.boards.read().await;
        let mut tasks = boards
            .get(board_id)
            .map(|board| board.tasks.clone())
            .unwrap_or_default();
        tasks.sort_by_key(|record| record.task.order);
        Ok(tasks)
    }

    async fn create_task(&self, board_id: &str, draft: &TaskDraft) -> Result<BoardTask> {
        self.check_online()?;
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("Task title is required".to_string()));
        }

        let mut boards = self.boards.write().await;
        let board = boards.entry(board_id.to_string()).or_default();
        if board.column(&draft.column_key).is_none() {
            return Err(Error::ColumnNotFound(draft.column_key.clone()));
        }

        let order = board.next_task_order(&draft.column_key);
        let mut task = draft.to_task(Uuid::new_v4().simple().to_string(), order);
        task.title = title.to_string();
        if task.status.is_none() {
            task.status = Some("todo".to_string());
        }

        board
            .tasks
            .push(TaskRecord::new(draft.column_key.clone(), task.clone()));
        Ok(task)
    }

    async fn update_task(
        &self,
        board_id: &str,
        task_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<BoardTask> {
        self.check_online()?;
        let mut boards = self.boards.write().await;
        let record = boards
            .get_mut(board_id)
            .and_then(|board| board.tasks.iter_mut().find(|r| r.task.id == task_id))
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;

        record.task.merge(patch)?;
        Ok(record.task.clone())
    }

    async fn move_task(&self, board_id: &str, movement: &TaskMove) -> Result<()> {
        self.check_online()?;
        let mut boards = self.boards.write().await;
        let board = boards
            .get_mut(board_id)
            .ok_or_else(|| Error::TaskNotFound(movement.task_id.clone()))?;
        let position = board
            .task_position(&movement.task_id)
            .ok_or_else(|| Error::TaskNotFound(movement.task_id.clone()))?;
        if board.column(&movement.to_column_key).is_none() {
            return Err(Error::ColumnNotFound(movement.to_column_key.clone()));
        }

        let from = movement.from_index as i64;
        let to = movement.to_index as i64;
        let same_column = movement.from_column_key == movement.to_column_key;

        for record in board
            .tasks
            .iter_mut()
            .filter(|record| record.task.id != movement.task_id)
        {
            let order = &mut record.task.order;
            if same_column {
                if record.column_key != movement.from_column_key {
                    continue;
                }
                if from < to && *order > from && *order <= to {
                    *order -= 1;
                } else if from > to && *order >= to && *order < from {
                    *order += 1;
                }
            } else if record.column_key == movement.from_column_key && *order > from {
                *order -= 1;
            } else if record.column_key == movement.to_column_key && *order >= to {
                *order += 1;
            }
        }

        if let Some(record) = board.tasks.get_mut(position) {
            record.column_key = movement.to_column_key.clone();
            record.task.order = to;
        }
        Ok(())
    }

    async fn delete_task(&self, board_id: &str, task_id: &str) -> Result<()> {
        self.check_online()?;
        let mut boards = self.boards.write().await;
        let board = boards
            .get_mut(board_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        let position = board
            .task_position(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;

        let removed = board.tasks.remove(position);
        for record in board
            .tasks
            .iter_mut()
            .filter(|record| record.column_key == removed.column_key)
        {
            if record.task.order > removed.task.order {
                record.task.order -= 1;
            }
        }
        Ok(())
    }

    async fn create_column(
        &self,
        board_id: &str,
        name: &str,
        color: Option<&str>,
    ) -> Result<ColumnMeta> {
        self.check_online()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Column name must be specified".to_string()));
        }

        let suffix = Uuid::new_v4().simple().to_string();
        let key = format!("col_{}_{}", Utc::now().timestamp_millis(), &suffix[..9]);

        let mut boards = self.boards.write().await;
        let board = boards.entry(board_id.to_string()).or_default();
        let mut column = ColumnMeta::new(key, name)
            .with_id(Uuid::new_v4().simple().to_string())
            .with_order(board.next_column_order());
        column.color = Some(color.unwrap_or(DEFAULT_COLUMN_COLOR).to_string());

        board.columns.push(column.clone());
        Ok(column)
    }

    async fn update_column(
        &self,
        board_id: &str,
        column_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<ColumnMeta> {
        self.check_online()?;
        let mut boards = self.boards.write().await;
        let column = boards
            .get_mut(board_id)
            .and_then(|board| {
                board
                    .columns
                    .iter_mut()
                    .find(|column| column.id.as_deref() == Some(column_id))
            })
            .ok_or_else(|| Error::ColumnNotFound(column_id.to_string()))?;

        column.merge(patch)?;
        Ok(column.clone())
    }

    async fn delete_column(
        &self,
        board_id: &str,
        column_id: &str,
        move_tasks_to: Option<&str>,
    ) -> Result<()> {
        self.check_online()?;
        let mut boards = self.boards.write().await;
        let board = boards
            .get_mut(board_id)
            .ok_or_else(|| Error::ColumnNotFound(column_id.to_string()))?;
        let position = board
            .columns
            .iter()
            .position(|column| column.id.as_deref() == Some(column_id))
            .ok_or_else(|| Error::ColumnNotFound(column_id.to_string()))?;
        let key = board.columns[position].key.clone();

        let mut moving: Vec<usize> = board
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, record)| record.column_key == key)
            .map(|(index, _)| index)
            .collect();

        if !moving.is_empty() {
            let Some(target) = move_tasks_to else {
                return Err(Error::Conflict(format!(
                    "Cannot delete column with {} tasks. Either move tasks first or provide a target column",
                    moving.len()
                )));
            };
            if board.column(target).is_none() {
                return Err(Error::ColumnNotFound(target.to_string()));
            }

            moving.sort_by_key(|index| board.tasks[*index].task.order);
            let mut next_order = board.next_task_order(target);
            for index in moving {
                if let Some(record) = board.tasks.get_mut(index) {
                    record.column_key = target.to_string();
                    record.task.order = next_order;
                    next_order += 1;
                }
            }
        }

        board.columns.remove(position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn backend_with_columns(keys: &[&str]) -> MemoryBackend {
        let backend = MemoryBackend::new();
        for key in keys {
            backend.add_column("p1", key, key).await.unwrap();
        }
        backend
    }

    async fn orders(backend: &MemoryBackend, column_key: &str) -> Vec<(String, i64)> {
        backend
            .fetch_tasks("p1")
            .await
            .unwrap()
            .into_iter()
            .filter(|record| record.column_key == column_key)
            .map(|record| (record.task.title, record.task.order))
            .collect()
    }

    #[tokio::test]
    async fn test_create_task_assigns_next_order() {
        let backend = backend_with_columns(&["todo"]).await;

        let first = backend
            .create_task("p1", &TaskDraft::new("todo", "First"))
            .await
            .unwrap();
        let second = backend
            .create_task("p1", &TaskDraft::new("todo", "Second"))
            .await
            .unwrap();

        assert_eq!(first.order, 0);
        assert_eq!(second.order, 1);
        assert_eq!(second.status.as_deref(), Some("todo"));
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_create_task_requires_known_column() {
        let backend = backend_with_columns(&["todo"]).await;

        let result = backend
            .create_task("p1", &TaskDraft::new("nope", "Task"))
            .await;

        assert!(matches!(result, Err(Error::ColumnNotFound(_))));
    }

    #[tokio::test]
    async fn test_add_column_rejects_duplicate_key() {
        let backend = backend_with_columns(&["todo"]).await;

        let result = backend.add_column("p1", "TODO", "Again").await;

        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_move_renumbers_both_columns() {
        let backend = backend_with_columns(&["todo", "done"]).await;
        let mut ids = Vec::new();
        for title in ["a", "b", "c"] {
            let task = backend
                .create_task("p1", &TaskDraft::new("todo", title))
                .await
                .unwrap();
            ids.push(task.id);
        }
        backend
            .create_task("p1", &TaskDraft::new("done", "d"))
            .await
            .unwrap();

        backend
            .move_task(
                "p1",
                &TaskMove {
                    task_id: ids[0].clone(),
                    from_column_key: "todo".to_string(),
                    to_column_key: "done".to_string(),
                    from_index: 0,
                    to_index: 0,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            orders(&backend, "todo").await,
            vec![("b".to_string(), 0), ("c".to_string(), 1)]
        );
        assert_eq!(
            orders(&backend, "done").await,
            vec![("a".to_string(), 0), ("d".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_move_within_column() {
        let backend = backend_with_columns(&["todo"]).await;
        let mut ids = Vec::new();
        for title in ["a", "b", "c"] {
            let task = backend
                .create_task("p1", &TaskDraft::new("todo", title))
                .await
                .unwrap();
            ids.push(task.id);
        }

        backend
            .move_task(
                "p1",
                &TaskMove {
                    task_id: ids[0].clone(),
                    from_column_key: "todo".to_string(),
                    to_column_key: "todo".to_string(),
                    from_index: 0,
                    to_index: 2,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            orders(&backend, "todo").await,
            vec![
                ("b".to_string(), 0),
                ("c".to_string(), 1),
                ("a".to_string(), 2)
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_task_closes_gap() {
        let backend = backend_with_columns(&["todo"]).await;
        let first = backend
            .create_task("p1", &TaskDraft::new("todo", "a"))
            .await
            .unwrap();
        backend
            .create_task("p1", &TaskDraft::new("todo", "b"))
            .await
            .unwrap();

        backend.delete_task("p1", &first.id).await.unwrap();

        assert_eq!(orders(&backend, "todo").await, vec![("b".to_string(), 0)]);
    }

    #[tokio::test]
    async fn test_delete_column_needs_target_when_not_empty() {
        let backend = backend_with_columns(&["todo", "done"]).await;
        backend
            .create_task("p1", &TaskDraft::new("todo", "a"))
            .await
            .unwrap();
        backend
            .create_task("p1", &TaskDraft::new("done", "x"))
            .await
            .unwrap();
        let columns = backend.fetch_columns("p1").await.unwrap();
        let todo_id = columns[0].id.clone().unwrap();

        let refused = backend.delete_column("p1", &todo_id, None).await;
        assert!(matches!(refused, Err(Error::Conflict(_))));

        backend
            .delete_column("p1", &todo_id, Some("done"))
            .await
            .unwrap();

        assert_eq!(backend.fetch_columns("p1").await.unwrap().len(), 1);
        assert_eq!(
            orders(&backend, "done").await,
            vec![("x".to_string(), 0), ("a".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_create_and_update_column() {
        let backend = MemoryBackend::new();
        let column = backend.create_column("p1", "Review", None).await.unwrap();

        assert!(column.key.starts_with("col_"));
        assert_eq!(column.color.as_deref(), Some(DEFAULT_COLUMN_COLOR));

        let patch = json!({ "name": "QA" });
        let updated = backend
            .update_column("p1", column.id.as_deref().unwrap(), patch.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(updated.name, "QA");
        assert_eq!(updated.key, column.key);
    }

    #[tokio::test]
    async fn test_offline_backend_fails_every_call() {
        let backend = backend_with_columns(&["todo"]).await;
        backend.set_offline(true);

        assert!(matches!(
            backend.fetch_columns("p1").await,
            Err(Error::Backend(_))
        ));
        assert!(backend
            .create_task("p1", &TaskDraft::new("todo", "a"))
            .await
            .is_err());

        backend.set_offline(false);
        assert_eq!(backend.fetch_columns("p1").await.unwrap().len(), 1);
    }
}
