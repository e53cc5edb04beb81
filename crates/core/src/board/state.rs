//! Local board state and event reconciliation
//!
//! A [`BoardState`] is a client's working copy of one board: column key to
//! column metadata plus an ordered task list. It is rebuilt from the durable
//! backend on load and then kept current by applying [`BoardEvent`]s, both
//! the client's own optimistic mutations and the ones relayed from other
//! collaborators.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::error::Error;
use crate::event::{
    BoardEvent, ColumnCreated, ColumnDeleted, ColumnUpdated, TaskCreated, TaskDeleted, TaskMoved,
    TaskUpdated,
};
use crate::Result;

use super::model::{BoardColumn, BoardTask, ColumnMeta, TaskMove, TaskRecord};

/// How `task:moved` indices are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovePolicy {
    /// Take `fromIndex`/`toIndex` as sent. After concurrent moves a stale
    /// index can pick up a neighbouring task, and local order stays off
    /// until the next full fetch.
    #[default]
    TrustIndex,
    /// Find the task by id wherever it currently is and clamp `toIndex` to
    /// the destination length.
    LocateById,
}

/// Why an event left the board unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownColumn(String),
    UnknownTask(String),
    IndexOutOfRange { column_key: String, index: usize },
    /// An event name outside the relayed set, e.g. `column:tasks-moved`
    UnsupportedEvent(String),
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownColumn(key) => write!(f, "column '{}' not on board", key),
            Self::UnknownTask(id) => write!(f, "task '{}' not on board", id),
            Self::IndexOutOfRange { column_key, index } => {
                write!(f, "index {} out of range in column '{}'", index, column_key)
            }
            Self::UnsupportedEvent(name) => write!(f, "event '{}' is not handled", name),
        }
    }
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Ignored(IgnoreReason),
    /// Typing or cursor activity; nothing to change on the board
    Presence,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// A client's working copy of one board
#[derive(Debug, Clone, PartialEq)]
pub struct BoardState {
    board_id: String,
    columns: HashMap<String, BoardColumn>,
    move_policy: MovePolicy,
}

impl BoardState {
    /// Create an empty board
    pub fn new(board_id: impl Into<String>) -> Self {
        Self {
            board_id: board_id.into(),
            columns: HashMap::new(),
            move_policy: MovePolicy::default(),
        }
    }

    pub fn with_move_policy(mut self, move_policy: MovePolicy) -> Self {
        self.move_policy = move_policy;
        self
    }

    /// Build a board from the backend's column and task listings.
    ///
    /// Tasks are grouped by column key and sorted by `order`. Tasks whose
    /// column is not listed are dropped.
    pub fn assemble(
        board_id: impl Into<String>,
        columns: Vec<ColumnMeta>,
        tasks: Vec<TaskRecord>,
    ) -> Self {
        let mut state = Self::new(board_id);

        for meta in columns {
            if meta.key.is_empty() {
                warn!("Skipping column without key on board {}", state.board_id);
                continue;
            }
            state
                .columns
                .insert(meta.key.clone(), BoardColumn::new(meta));
        }

        for record in tasks {
            match state.columns.get_mut(&record.column_key) {
                Some(column) => column.tasks.push(record.task),
                None => warn!(
                    "Dropping task {} for unknown column {}",
                    record.task.id, record.column_key
                ),
            }
        }

        for column in state.columns.values_mut() {
            column.tasks.sort_by_key(|task| task.order);
        }

        state
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn column(&self, key: &str) -> Option<&BoardColumn> {
        self.columns.get(key)
    }

    /// Tasks of a column, empty if the column is unknown
    pub fn tasks(&self, key: &str) -> &[BoardTask] {
        self.columns
            .get(key)
            .map(|column| column.tasks.as_slice())
            .unwrap_or(&[])
    }

    /// Columns in display order
    pub fn ordered_columns(&self) -> Vec<&BoardColumn> {
        let mut columns: Vec<&BoardColumn> = self.columns.values().collect();
        columns.sort_by(|a, b| a.meta.order.cmp(&b.meta.order).then_with(|| a.key().cmp(b.key())));
        columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn task_count(&self) -> usize {
        self.columns.values().map(|column| column.tasks.len()).sum()
    }

    /// Find a task and where it sits
    pub fn find_task(&self, task_id: &str) -> Option<(&str, usize, &BoardTask)> {
        self.columns.iter().find_map(|(key, column)| {
            column
                .position_of(task_id)
                .map(|index| (key.as_str(), index, &column.tasks[index]))
        })
    }

    fn locate(&self, task_id: &str) -> Option<(String, usize)> {
        self.find_task(task_id)
            .map(|(key, index, _)| (key.to_string(), index))
    }

    /// Replace a task (found by `task_id`) with another, keeping its position
    pub fn replace_task(&mut self, task_id: &str, task: BoardTask) -> bool {
        let Some((key, index)) = self.locate(task_id) else {
            return false;
        };
        match self.columns.get_mut(&key).and_then(|c| c.tasks.get_mut(index)) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    /// Swap a column entry for one under a new key, keeping its tasks
    pub fn rekey_column(&mut self, old_key: &str, meta: ColumnMeta) -> bool {
        let Some(mut column) = self.columns.remove(old_key) else {
            return false;
        };
        column.meta = meta;
        self.columns.insert(column.meta.key.clone(), column);
        true
    }

    /// Apply one board event
    pub fn apply(&mut self, event: &BoardEvent) -> Result<ApplyOutcome> {
        let outcome = match event {
            BoardEvent::TaskCreated(created) => self.task_created(created),
            BoardEvent::TaskUpdated(updated) => self.task_updated(updated)?,
            BoardEvent::TaskMoved(moved) => self.task_moved(moved),
            BoardEvent::TaskDeleted(deleted) => self.task_deleted(deleted),
            BoardEvent::ColumnCreated(created) => self.column_created(created)?,
            BoardEvent::ColumnUpdated(updated) => self.column_updated(updated)?,
            BoardEvent::ColumnDeleted(deleted) => self.column_deleted(deleted),
            BoardEvent::TaskTyping(_) | BoardEvent::CursorMoved(_) => ApplyOutcome::Presence,
        };

        if let ApplyOutcome::Ignored(reason) = &outcome {
            debug!(
                "Ignored {} on board {}: {}",
                event.kind().relayed_name(),
                self.board_id,
                reason
            );
        }
        Ok(outcome)
    }

    fn task_created(&mut self, created: &TaskCreated) -> ApplyOutcome {
        // A task we already hold (own create seen again after a resync)
        // is replaced where it is rather than appended twice.
        if self.replace_task(&created.task.id, created.task.clone()) {
            return ApplyOutcome::Applied;
        }

        match self.columns.get_mut(&created.column_key) {
            Some(column) => {
                column.tasks.push(created.task.clone());
                ApplyOutcome::Applied
            }
            None => ApplyOutcome::Ignored(IgnoreReason::UnknownColumn(created.column_key.clone())),
        }
    }

    fn task_updated(&mut self, updated: &TaskUpdated) -> Result<ApplyOutcome> {
        let Some((key, index)) = self.locate(&updated.task_id) else {
            return Ok(ApplyOutcome::Ignored(IgnoreReason::UnknownTask(
                updated.task_id.clone(),
            )));
        };

        if let Some(task) = self.columns.get_mut(&key).and_then(|c| c.tasks.get_mut(index)) {
            task.merge(&updated.task)?;
        }
        Ok(ApplyOutcome::Applied)
    }

    fn task_moved(&mut self, moved: &TaskMoved) -> ApplyOutcome {
        let movement = &moved.movement;

        // Never take a task out before knowing it has somewhere to go.
        if !self.columns.contains_key(&movement.to_column_key) {
            return ApplyOutcome::Ignored(IgnoreReason::UnknownColumn(
                movement.to_column_key.clone(),
            ));
        }

        let taken = match self.move_policy {
            MovePolicy::TrustIndex => self.take_at(movement),
            MovePolicy::LocateById => self.take_by_id(movement),
        };
        let task = match taken {
            Ok(task) => task,
            Err(reason) => return ApplyOutcome::Ignored(reason),
        };

        match self.columns.get_mut(&movement.to_column_key) {
            Some(target) => {
                let index = movement.to_index.min(target.tasks.len());
                target.tasks.insert(index, task);
                ApplyOutcome::Applied
            }
            None => ApplyOutcome::Ignored(IgnoreReason::UnknownColumn(
                movement.to_column_key.clone(),
            )),
        }
    }

    fn take_at(&mut self, movement: &TaskMove) -> std::result::Result<BoardTask, IgnoreReason> {
        let source = self
            .columns
            .get_mut(&movement.from_column_key)
            .ok_or_else(|| IgnoreReason::UnknownColumn(movement.from_column_key.clone()))?;

        if movement.from_index >= source.tasks.len() {
            return Err(IgnoreReason::IndexOutOfRange {
                column_key: movement.from_column_key.clone(),
                index: movement.from_index,
            });
        }

        let task = source.tasks.remove(movement.from_index);
        if task.id != movement.task_id {
            debug!(
                "Stale move index on board {}: expected {} at {}[{}], found {}",
                self.board_id, movement.task_id, movement.from_column_key, movement.from_index, task.id
            );
        }
        Ok(task)
    }

    fn take_by_id(&mut self, movement: &TaskMove) -> std::result::Result<BoardTask, IgnoreReason> {
        let (key, index) = self
            .locate(&movement.task_id)
            .ok_or_else(|| IgnoreReason::UnknownTask(movement.task_id.clone()))?;

        self.columns
            .get_mut(&key)
            .map(|column| column.tasks.remove(index))
            .ok_or(IgnoreReason::UnknownColumn(key))
    }

    fn task_deleted(&mut self, deleted: &TaskDeleted) -> ApplyOutcome {
        let Some(column) = self.columns.get_mut(&deleted.column_key) else {
            return ApplyOutcome::Ignored(IgnoreReason::UnknownColumn(deleted.column_key.clone()));
        };

        let before = column.tasks.len();
        column.tasks.retain(|task| task.id != deleted.task_id);
        if column.tasks.len() == before {
            ApplyOutcome::Ignored(IgnoreReason::UnknownTask(deleted.task_id.clone()))
        } else {
            ApplyOutcome::Applied
        }
    }

    fn column_created(&mut self, created: &ColumnCreated) -> Result<ApplyOutcome> {
        let meta = &created.column;
        if meta.key.is_empty() {
            return Err(Error::invalid_payload("column:created", "column key is empty"));
        }

        match self.columns.get_mut(&meta.key) {
            Some(existing) => existing.meta = meta.clone(),
            None => {
                self.columns
                    .insert(meta.key.clone(), BoardColumn::new(meta.clone()));
            }
        }
        Ok(ApplyOutcome::Applied)
    }

    fn column_updated(&mut self, updated: &ColumnUpdated) -> Result<ApplyOutcome> {
        match self.columns.get_mut(&updated.column_key) {
            Some(column) => column.meta.merge(&updated.updates)?,
            None => {
                let mut meta = ColumnMeta::new(updated.column_key.clone(), "");
                meta.id = updated.column_id.clone();
                meta.merge(&updated.updates)?;
                self.columns
                    .insert(updated.column_key.clone(), BoardColumn::new(meta));
            }
        }
        Ok(ApplyOutcome::Applied)
    }

    fn column_deleted(&mut self, deleted: &ColumnDeleted) -> ApplyOutcome {
        let Some(removed) = self.columns.remove(&deleted.column_key) else {
            return ApplyOutcome::Ignored(IgnoreReason::UnknownColumn(deleted.column_key.clone()));
        };

        let target_key = deleted
            .moved_to
            .as_deref()
            .filter(|key| *key != deleted.column_key);

        match target_key {
            Some(key) => {
                let target = self
                    .columns
                    .entry(key.to_string())
                    .or_insert_with(|| BoardColumn::new(ColumnMeta::new(key, "")));
                target.tasks.extend(removed.tasks);
                target.tasks.sort_by_key(|task| task.order);
            }
            None if !removed.tasks.is_empty() => debug!(
                "Column {} deleted on board {}, dropping {} tasks from view",
                deleted.column_key,
                self.board_id,
                removed.tasks.len()
            ),
            None => {}
        }
        ApplyOutcome::Applied
    }
}
