//! Board model definitions
//!
//! Field names follow the JSON the durable backend produces (`_id`,
//! camelCase), so records pass straight through. Fields the board does not
//! interpret are kept in `extra` and survive merges.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::Result;

/// A task card on the board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardTask {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// Position hint from the durable store; the list index is authoritative
    #[serde(default)]
    pub order: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BoardTask {
    /// Create a new task
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status: None,
            deadline: None,
            order: 0,
            extra: Map::new(),
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set deadline
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set order
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    /// Merge a partial task into this one, field by field.
    ///
    /// The id never changes. On error the task is left untouched.
    pub fn merge(&mut self, patch: &Map<String, Value>) -> Result<()> {
        let mut merged: BoardTask = merge_fields(self, patch, &[], "task")?;
        merged.id = self.id.clone();
        *self = merged;
        Ok(())
    }
}

/// Column metadata, without its tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    #[serde(
        rename = "_id",
        alias = "id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ColumnMeta {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            key: key.into(),
            name: name.into(),
            order: 0,
            color: None,
            extra: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    /// Merge updated fields. The key and any `tasks` field are ignored.
    pub fn merge(&mut self, patch: &Map<String, Value>) -> Result<()> {
        let mut merged: ColumnMeta = merge_fields(self, patch, &["key", "tasks"], "column")?;
        merged.key = self.key.clone();
        *self = merged;
        Ok(())
    }
}

/// A column together with its ordered task list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardColumn {
    #[serde(flatten)]
    pub meta: ColumnMeta,
    #[serde(default)]
    pub tasks: Vec<BoardTask>,
}

impl BoardColumn {
    pub fn new(meta: ColumnMeta) -> Self {
        Self {
            meta,
            tasks: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.meta.key
    }

    /// Index of a task in this column
    pub fn position_of(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|task| task.id == task_id)
    }
}

/// A task as listed by the durable backend, tagged with its column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub column_key: String,
    #[serde(flatten)]
    pub task: BoardTask,
}

impl TaskRecord {
    pub fn new(column_key: impl Into<String>, task: BoardTask) -> Self {
        Self {
            column_key: column_key.into(),
            task,
        }
    }
}

/// Fields for a task that does not exist yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: String,
    pub column_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

impl TaskDraft {
    pub fn new(column_key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            column_key: column_key.into(),
            description: None,
            status: None,
            deadline: None,
            assigned_to: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_assignee(mut self, user_id: impl Into<String>) -> Self {
        self.assigned_to = Some(user_id.into());
        self
    }

    /// Build the task this draft describes, under the given id
    pub fn to_task(&self, id: impl Into<String>, order: i64) -> BoardTask {
        BoardTask {
            id: id.into(),
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status.clone(),
            deadline: self.deadline,
            order,
            extra: Map::new(),
        }
    }
}

/// A drag from one list position to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMove {
    pub task_id: String,
    pub from_column_key: String,
    pub to_column_key: String,
    pub from_index: usize,
    pub to_index: usize,
}

impl TaskMove {
    /// Dropping a card where it was picked up
    pub fn is_noop(&self) -> bool {
        self.from_column_key == self.to_column_key && self.from_index == self.to_index
    }
}

fn merge_fields<T>(current: &T, patch: &Map<String, Value>, skip: &[&str], what: &str) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let Value::Object(mut merged) = serde_json::to_value(current)? else {
        return Err(Error::invalid_payload(what, "not a JSON object"));
    };
    for (key, value) in patch {
        let key = if key == "id" { "_id" } else { key.as_str() };
        if skip.contains(&key) {
            continue;
        }
        merged.insert(key.to_string(), value.clone());
    }
    serde_json::from_value(Value::Object(merged)).map_err(|e| Error::invalid_payload(what, e))
}
