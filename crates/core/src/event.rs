//! Realtime event set shared by the relay and the board client
//!
//! Every mutation that travels over the relay is one of the [`EventKind`]s
//! below. A client emits the inbound name (`task:create`), the relay forwards
//! the payload to the rest of the room under the relayed name
//! (`task:created`), and receivers decode it into a [`BoardEvent`].

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::board::{BoardTask, ColumnMeta, TaskMove};
use crate::error::Error;
use crate::Result;

/// The closed set of relayable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TaskCreate,
    TaskUpdate,
    TaskMove,
    TaskDelete,
    ColumnCreate,
    ColumnUpdate,
    ColumnDelete,
    TaskTyping,
    CursorMove,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::TaskCreate,
        EventKind::TaskUpdate,
        EventKind::TaskMove,
        EventKind::TaskDelete,
        EventKind::ColumnCreate,
        EventKind::ColumnUpdate,
        EventKind::ColumnDelete,
        EventKind::TaskTyping,
        EventKind::CursorMove,
    ];

    /// Name a client emits to the relay
    pub fn inbound_name(self) -> &'static str {
        match self {
            Self::TaskCreate => "task:create",
            Self::TaskUpdate => "task:update",
            Self::TaskMove => "task:move",
            Self::TaskDelete => "task:delete",
            Self::ColumnCreate => "column:create",
            Self::ColumnUpdate => "column:update",
            Self::ColumnDelete => "column:delete",
            Self::TaskTyping => "task:typing",
            Self::CursorMove => "cursor:move",
        }
    }

    /// Name the relay delivers to the rest of the room
    pub fn relayed_name(self) -> &'static str {
        match self {
            Self::TaskCreate => "task:created",
            Self::TaskUpdate => "task:updated",
            Self::TaskMove => "task:moved",
            Self::TaskDelete => "task:deleted",
            Self::ColumnCreate => "column:created",
            Self::ColumnUpdate => "column:updated",
            Self::ColumnDelete => "column:deleted",
            Self::TaskTyping => "task:typing",
            Self::CursorMove => "cursor:moved",
        }
    }

    pub fn from_inbound(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.inbound_name() == name)
    }

    pub fn from_relayed(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.relayed_name() == name)
    }

    /// Typing and cursor events carry presence, not board mutations
    pub fn is_presence(self) -> bool {
        matches!(self, Self::TaskTyping | Self::CursorMove)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.inbound_name())
    }
}

/// Room membership requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomControl {
    Join,
    Leave,
}

impl RoomControl {
    pub fn name(self) -> &'static str {
        match self {
            Self::Join => "join:project",
            Self::Leave => "leave:project",
        }
    }
}

/// Board id carried by a payload.
///
/// Room requests may send the bare id; mutation payloads carry it as
/// `projectId` (older clients used `boardId`).
pub fn board_id_of(payload: &Value) -> Option<String> {
    match payload {
        Value::Object(map) => map
            .get("projectId")
            .or_else(|| map.get("boardId"))
            .and_then(id_string),
        other => id_string(other),
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

// ============ Payloads ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreated {
    pub task: BoardTask,
    pub column_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdated {
    pub task_id: String,
    /// Updated fields; the backend sends the whole task
    #[serde(default)]
    pub task: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMoved {
    #[serde(flatten)]
    pub movement: TaskMove,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Value>,
}

impl From<TaskMove> for TaskMoved {
    fn from(movement: TaskMove) -> Self {
        Self {
            movement,
            task: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDeleted {
    pub task_id: String,
    pub column_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnCreated {
    pub column: ColumnMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnUpdated {
    pub column_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<String>,
    #[serde(default)]
    pub updates: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDeleted {
    pub column_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<String>,
    /// Column that received the deleted column's tasks
    #[serde(default)]
    pub moved_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMoved {
    /// Filled in by the relay from the sender's credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub position: Value,
}

/// A decoded board notification
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    TaskCreated(TaskCreated),
    TaskUpdated(TaskUpdated),
    TaskMoved(TaskMoved),
    TaskDeleted(TaskDeleted),
    ColumnCreated(ColumnCreated),
    ColumnUpdated(ColumnUpdated),
    ColumnDeleted(ColumnDeleted),
    TaskTyping(TypingIndicator),
    CursorMoved(CursorMoved),
}

impl BoardEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TaskCreated(_) => EventKind::TaskCreate,
            Self::TaskUpdated(_) => EventKind::TaskUpdate,
            Self::TaskMoved(_) => EventKind::TaskMove,
            Self::TaskDeleted(_) => EventKind::TaskDelete,
            Self::ColumnCreated(_) => EventKind::ColumnCreate,
            Self::ColumnUpdated(_) => EventKind::ColumnUpdate,
            Self::ColumnDeleted(_) => EventKind::ColumnDelete,
            Self::TaskTyping(_) => EventKind::TaskTyping,
            Self::CursorMoved(_) => EventKind::CursorMove,
        }
    }

    /// Decode a relayed event by its delivered name
    pub fn decode(name: &str, payload: Value) -> Result<Self> {
        let kind =
            EventKind::from_relayed(name).ok_or_else(|| Error::UnknownEvent(name.to_string()))?;
        Self::decode_kind(kind, payload)
    }

    pub fn decode_kind(kind: EventKind, payload: Value) -> Result<Self> {
        fn parse<T: DeserializeOwned>(kind: EventKind, payload: Value) -> Result<T> {
            serde_json::from_value(payload)
                .map_err(|e| Error::invalid_payload(kind.relayed_name(), e))
        }

        Ok(match kind {
            EventKind::TaskCreate => Self::TaskCreated(parse(kind, payload)?),
            EventKind::TaskUpdate => Self::TaskUpdated(parse(kind, payload)?),
            EventKind::TaskMove => Self::TaskMoved(parse(kind, payload)?),
            EventKind::TaskDelete => Self::TaskDeleted(parse(kind, payload)?),
            EventKind::ColumnCreate => Self::ColumnCreated(parse(kind, payload)?),
            EventKind::ColumnUpdate => Self::ColumnUpdated(parse(kind, payload)?),
            EventKind::ColumnDelete => Self::ColumnDeleted(parse(kind, payload)?),
            EventKind::TaskTyping => Self::TaskTyping(parse(kind, payload)?),
            EventKind::CursorMove => Self::CursorMoved(parse(kind, payload)?),
        })
    }

    /// Payload body without routing information
    pub fn body(&self) -> Result<Value> {
        let body = match self {
            Self::TaskCreated(body) => serde_json::to_value(body)?,
            Self::TaskUpdated(body) => serde_json::to_value(body)?,
            Self::TaskMoved(body) => serde_json::to_value(body)?,
            Self::TaskDeleted(body) => serde_json::to_value(body)?,
            Self::ColumnCreated(body) => serde_json::to_value(body)?,
            Self::ColumnUpdated(body) => serde_json::to_value(body)?,
            Self::ColumnDeleted(body) => serde_json::to_value(body)?,
            Self::TaskTyping(body) => serde_json::to_value(body)?,
            Self::CursorMoved(body) => serde_json::to_value(body)?,
        };
        Ok(body)
    }

    /// Payload to emit to the relay for the given board
    pub fn to_payload(&self, board_id: &str) -> Result<Value> {
        let mut body = self.body()?;
        if let Value::Object(map) = &mut body {
            map.insert("projectId".to_string(), Value::String(board_id.to_string()));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_kind_has_distinct_names() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_inbound(kind.inbound_name()), Some(kind));
            assert_eq!(EventKind::from_relayed(kind.relayed_name()), Some(kind));
        }
        assert_eq!(EventKind::from_inbound("task:created"), None);
        assert_eq!(EventKind::from_relayed("cursor:move"), None);
    }

    #[test]
    fn test_decode_task_moved() {
        let event = BoardEvent::decode(
            "task:moved",
            json!({
                "taskId": "t1",
                "fromColumnKey": "backlog",
                "toColumnKey": "staging",
                "fromIndex": 0,
                "toIndex": 2,
                "task": { "_id": "t1", "title": "Deploy" }
            }),
        )
        .unwrap();

        match event {
            BoardEvent::TaskMoved(moved) => {
                assert_eq!(moved.movement.task_id, "t1");
                assert_eq!(moved.movement.to_column_key, "staging");
                assert_eq!(moved.movement.to_index, 2);
                assert!(moved.task.is_some());
            }
            other => panic!("Expected TaskMoved, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_column_deleted_without_target() {
        let event = BoardEvent::decode(
            "column:deleted",
            json!({ "columnKey": "review", "columnId": "c9", "movedTo": null }),
        )
        .unwrap();

        assert_eq!(event.kind(), EventKind::ColumnDelete);
        match event {
            BoardEvent::ColumnDeleted(deleted) => assert!(deleted.moved_to.is_none()),
            other => panic!("Expected ColumnDeleted, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_event() {
        let err = BoardEvent::decode("column:tasks-moved", json!({})).unwrap_err();
        assert!(matches!(err, Error::UnknownEvent(name) if name == "column:tasks-moved"));
    }

    #[test]
    fn test_decode_invalid_payload() {
        let err = BoardEvent::decode("task:deleted", json!({ "taskId": 7 })).unwrap_err();
        assert!(matches!(err, Error::InvalidPayload { event, .. } if event == "task:deleted"));
    }

    #[test]
    fn test_to_payload_adds_project_id() {
        let event = BoardEvent::TaskDeleted(TaskDeleted {
            task_id: "t1".to_string(),
            column_key: "todo".to_string(),
            task: None,
        });

        let payload = event.to_payload("p1").unwrap();
        assert_eq!(payload["projectId"], "p1");
        assert_eq!(payload["taskId"], "t1");
        assert_eq!(board_id_of(&payload).as_deref(), Some("p1"));
    }

    #[test]
    fn test_board_id_of_variants() {
        assert_eq!(board_id_of(&json!("p1")).as_deref(), Some("p1"));
        assert_eq!(board_id_of(&json!({ "boardId": "b2" })).as_deref(), Some("b2"));
        assert_eq!(board_id_of(&json!(42)).as_deref(), Some("42"));
        assert_eq!(board_id_of(&json!({ "taskId": "t1" })), None);
        assert_eq!(board_id_of(&json!("  ")), None);
    }
}
