//! Durable backend contract
//!
//! The board client never owns authoritative state; it reads and writes
//! through a [`BoardBackend`] and only mirrors the result locally.

mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::board::{BoardTask, ColumnMeta, TaskDraft, TaskMove, TaskRecord};
use crate::Result;

pub use memory::MemoryBackend;

/// Durable store for columns and tasks of a board
#[async_trait]
pub trait BoardBackend: Send + Sync {
    /// List the columns of a board
    async fn fetch_columns(&self, board_id: &str) -> Result<Vec<ColumnMeta>>;

    /// List the tasks of a board, each tagged with its column key
    async fn fetch_tasks(&self, board_id: &str) -> Result<Vec<TaskRecord>>;

    /// Create a task, returning it with its durable id
    async fn create_task(&self, board_id: &str, draft: &TaskDraft) -> Result<BoardTask>;

    /// Update fields of a task, returning the stored task
    async fn update_task(
        &self,
        board_id: &str,
        task_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<BoardTask>;

    /// Move a task between list positions
    async fn move_task(&self, board_id: &str, movement: &TaskMove) -> Result<()>;

    /// Delete a task
    async fn delete_task(&self, board_id: &str, task_id: &str) -> Result<()>;

    /// Create a column; the backend assigns its key
    async fn create_column(
        &self,
        board_id: &str,
        name: &str,
        color: Option<&str>,
    ) -> Result<ColumnMeta>;

    /// Update fields of a column, returning the stored column
    async fn update_column(
        &self,
        board_id: &str,
        column_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<ColumnMeta>;

    /// Delete a column, relocating its tasks to `move_tasks_to` if given
    async fn delete_column(
        &self,
        board_id: &str,
        column_id: &str,
        move_tasks_to: Option<&str>,
    ) -> Result<()>;
}
