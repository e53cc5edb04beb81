//! Board session management
//!
//! A [`BoardSession`] owns one user's view of one board. Local mutations are
//! applied to the board straight away, written to the durable backend, and
//! only then announced to the room through the relay. Events relayed from
//! other collaborators are folded in with [`BoardSession::handle_remote`].

use std::sync::Arc;

use board_core::event::{
    board_id_of, ColumnCreated, ColumnDeleted, ColumnUpdated, CursorMoved, TaskCreated, TaskDeleted,
    TaskMoved, TaskUpdated, TypingIndicator,
};
use board_core::{
    ApplyOutcome, BoardBackend, BoardEvent, BoardState, BoardTask, ColumnMeta, EventKind,
    IgnoreReason, MovePolicy, RoomControl, TaskDraft, TaskMove,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::transport::RealtimeTransport;

/// Where the session stands with the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected and subscribed to a board room
    Joined(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Joined(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A transient message for the user
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

pub struct BoardSession {
    backend: Arc<dyn BoardBackend>,
    transport: Arc<dyn RealtimeTransport>,
    token: String,
    move_policy: MovePolicy,
    state: ConnectionState,
    board: Option<BoardState>,
    last_board: Option<String>,
    notices: Vec<Notice>,
}

impl BoardSession {
    pub fn new(
        backend: Arc<dyn BoardBackend>,
        transport: Arc<dyn RealtimeTransport>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            transport,
            token: token.into(),
            move_policy: MovePolicy::default(),
            state: ConnectionState::Disconnected,
            board: None,
            last_board: None,
            notices: Vec::new(),
        }
    }

    /// Interpret relayed move indices with the given policy
    pub fn with_move_policy(mut self, move_policy: MovePolicy) -> Self {
        self.move_policy = move_policy;
        self
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.state
    }

    /// The last successfully loaded board
    pub fn board(&self) -> Option<&BoardState> {
        self.board.as_ref()
    }

    pub fn joined_board(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Joined(board_id) => Some(board_id),
            _ => None,
        }
    }

    /// Take the notices recorded since the last call
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn notice(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.notices.push(Notice {
            level,
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// Perform the handshake if not already connected
    pub async fn connect(&mut self) -> Result<()> {
        if self.state.is_connected() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        match self.transport.connect(&self.token).await {
            Ok(()) => {
                info!("Connected to relay");
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                warn!("Relay handshake failed: {}", e);
                self.state = ConnectionState::Disconnected;
                self.notice(NoticeLevel::Error, format!("Could not connect: {}", e));
                Err(e)
            }
        }
    }

    /// Load a board from the backend and join its room.
    ///
    /// The board is fetched before any room change. If the fetch fails the
    /// previously loaded board is kept and so is its room membership.
    pub async fn open(&mut self, board_id: &str) -> Result<()> {
        self.connect().await?;

        let board = match self.load(board_id).await {
            Ok(board) => board,
            Err(e) => {
                warn!("Failed to load board {}: {}", board_id, e);
                self.notice(NoticeLevel::Error, format!("Failed to load board: {}", e));
                return Err(e);
            }
        };
        info!(
            "Loaded board {} ({} columns, {} tasks)",
            board_id,
            board.column_count(),
            board.task_count()
        );

        if let ConnectionState::Joined(current) = &self.state {
            if current != board_id {
                let current = current.clone();
                self.transport.room(RoomControl::Leave, &current).await?;
                info!("Left board {}", current);
                self.state = ConnectionState::Connected;
            }
        }
        self.last_board = Some(board_id.to_string());
        self.board = Some(board);

        if self.joined_board() != Some(board_id) {
            self.transport.room(RoomControl::Join, board_id).await?;
            self.state = ConnectionState::Joined(board_id.to_string());
        }
        Ok(())
    }

    async fn load(&self, board_id: &str) -> Result<BoardState> {
        let columns = self.backend.fetch_columns(board_id).await?;
        let tasks = self.backend.fetch_tasks(board_id).await?;
        Ok(BoardState::assemble(board_id, columns, tasks).with_move_policy(self.move_policy))
    }

    /// Leave the current board room
    pub async fn leave(&mut self) -> Result<()> {
        if let ConnectionState::Joined(board_id) = &self.state {
            let board_id = board_id.clone();
            self.transport.room(RoomControl::Leave, &board_id).await?;
            info!("Left board {}", board_id);
            self.state = ConnectionState::Connected;
        }
        Ok(())
    }

    /// The transport reported the connection gone. The board is kept as is.
    pub fn connection_lost(&mut self) {
        if self.state != ConnectionState::Disconnected {
            warn!("Relay connection lost");
            self.state = ConnectionState::Disconnected;
            self.notice(NoticeLevel::Warning, "Connection lost, changes from others are paused");
        }
    }

    /// Reconnect and reload the last board from scratch.
    ///
    /// The fresh board replaces the local one wholesale; nothing is merged.
    pub async fn reconnect(&mut self) -> Result<()> {
        let board_id = self.last_board.clone().ok_or(ClientError::NoBoard)?;
        self.state = ConnectionState::Disconnected;
        self.open(&board_id).await?;
        self.notice(NoticeLevel::Info, "Reconnected");
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.leave().await?;
        self.transport.disconnect().await?;
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    /// Apply an event relayed from another collaborator.
    ///
    /// Returns `None` when the session is not joined to the event's board.
    /// Event names outside the relayed set come back as ignored.
    pub fn handle_remote(&mut self, name: &str, payload: Value) -> Result<Option<ApplyOutcome>> {
        let Some(joined) = self.joined_board() else {
            debug!("Ignoring {} while not joined", name);
            return Ok(None);
        };
        if let Some(board_id) = board_id_of(&payload) {
            if board_id != joined {
                debug!("Ignoring {} for board {}", name, board_id);
                return Ok(None);
            }
        }

        let Some(kind) = EventKind::from_relayed(name) else {
            debug!("Ignoring unsupported event {}", name);
            return Ok(Some(ApplyOutcome::Ignored(IgnoreReason::UnsupportedEvent(
                name.to_string(),
            ))));
        };
        let event = BoardEvent::decode_kind(kind, payload)?;
        if kind.is_presence() {
            return Ok(Some(ApplyOutcome::Presence));
        }
        let Some(board) = self.board.as_mut() else {
            return Ok(None);
        };
        Ok(Some(board.apply(&event)?))
    }

    // ============ Local mutations ============

    /// Create a task, shown at once under a provisional id
    pub async fn create_task(&mut self, draft: TaskDraft) -> Result<BoardTask> {
        let provisional = draft.to_task(format!("local-{}", Uuid::new_v4()), 0);
        let (board_id, snapshot) = self.begin(&BoardEvent::TaskCreated(TaskCreated {
            task: provisional.clone(),
            column_key: draft.column_key.clone(),
        }))?;

        let created = match self.backend.create_task(&board_id, &draft).await {
            Ok(task) => task,
            Err(e) => return Err(self.rollback(snapshot, "create task", e)),
        };
        if let Some(board) = self.board.as_mut() {
            board.replace_task(&provisional.id, created.clone());
        }

        self.announce(
            &board_id,
            BoardEvent::TaskCreated(TaskCreated {
                task: created.clone(),
                column_key: draft.column_key,
            }),
        )
        .await;
        Ok(created)
    }

    /// Change some of a task's fields
    pub async fn update_task(&mut self, task_id: &str, patch: Map<String, Value>) -> Result<BoardTask> {
        let (board_id, snapshot) = self.begin(&BoardEvent::TaskUpdated(TaskUpdated {
            task_id: task_id.to_string(),
            task: patch.clone(),
            column_key: None,
        }))?;

        let updated = match self.backend.update_task(&board_id, task_id, &patch).await {
            Ok(task) => task,
            Err(e) => return Err(self.rollback(snapshot, "update task", e)),
        };
        let column_key = self.board.as_mut().and_then(|board| {
            board.replace_task(task_id, updated.clone());
            board.find_task(task_id).map(|(key, _, _)| key.to_string())
        });

        self.announce(
            &board_id,
            BoardEvent::TaskUpdated(TaskUpdated {
                task_id: task_id.to_string(),
                task: fields_of(&updated)?,
                column_key,
            }),
        )
        .await;
        Ok(updated)
    }

    /// Drag a task from one list position to another
    pub async fn move_task(
        &mut self,
        from_column_key: &str,
        from_index: usize,
        to_column_key: &str,
        to_index: usize,
    ) -> Result<()> {
        let board = self.joined_state()?;
        let task = board
            .tasks(from_column_key)
            .get(from_index)
            .cloned()
            .ok_or_else(|| {
                ClientError::invalid_move(format!(
                    "no task at {} in column '{}'",
                    from_index, from_column_key
                ))
            })?;
        if board.column(to_column_key).is_none() {
            return Err(ClientError::invalid_move(format!(
                "column '{}' not on board",
                to_column_key
            )));
        }

        let movement = TaskMove {
            task_id: task.id.clone(),
            from_column_key: from_column_key.to_string(),
            to_column_key: to_column_key.to_string(),
            from_index,
            to_index,
        };
        if movement.is_noop() {
            return Ok(());
        }

        let (board_id, snapshot) = self.begin(&BoardEvent::TaskMoved(movement.clone().into()))?;
        if let Err(e) = self.backend.move_task(&board_id, &movement).await {
            return Err(self.rollback(snapshot, "move task", e));
        }

        self.announce(
            &board_id,
            BoardEvent::TaskMoved(TaskMoved {
                movement,
                task: Some(serde_json::to_value(&task).map_err(board_core::Error::from)?),
            }),
        )
        .await;
        Ok(())
    }

    pub async fn delete_task(&mut self, task_id: &str) -> Result<()> {
        let (column_key, task) = self
            .joined_state()?
            .find_task(task_id)
            .map(|(key, _, task)| (key.to_string(), task.clone()))
            .ok_or_else(|| board_core::Error::TaskNotFound(task_id.to_string()))?;

        let (board_id, snapshot) = self.begin(&BoardEvent::TaskDeleted(TaskDeleted {
            task_id: task_id.to_string(),
            column_key: column_key.clone(),
            task: None,
        }))?;
        if let Err(e) = self.backend.delete_task(&board_id, task_id).await {
            return Err(self.rollback(snapshot, "delete task", e));
        }

        self.announce(
            &board_id,
            BoardEvent::TaskDeleted(TaskDeleted {
                task_id: task_id.to_string(),
                column_key,
                task: Some(serde_json::to_value(&task).map_err(board_core::Error::from)?),
            }),
        )
        .await;
        Ok(())
    }

    /// Add a column at the end of the board
    pub async fn create_column(&mut self, name: &str, color: Option<&str>) -> Result<ColumnMeta> {
        let order = self
            .joined_state()?
            .ordered_columns()
            .last()
            .map(|column| column.meta.order + 1)
            .unwrap_or(0);
        let mut provisional =
            ColumnMeta::new(format!("local-{}", Uuid::new_v4()), name).with_order(order);
        provisional.color = color.map(str::to_string);

        let (board_id, snapshot) = self.begin(&BoardEvent::ColumnCreated(ColumnCreated {
            column: provisional.clone(),
        }))?;

        let created = match self.backend.create_column(&board_id, name, color).await {
            Ok(column) => column,
            Err(e) => return Err(self.rollback(snapshot, "create column", e)),
        };
        if let Some(board) = self.board.as_mut() {
            board.rekey_column(&provisional.key, created.clone());
        }

        self.announce(
            &board_id,
            BoardEvent::ColumnCreated(ColumnCreated {
                column: created.clone(),
            }),
        )
        .await;
        Ok(created)
    }

    /// Rename or recolour a column. Its key and tasks stay.
    pub async fn update_column(
        &mut self,
        column_key: &str,
        patch: Map<String, Value>,
    ) -> Result<ColumnMeta> {
        let column_id = self.durable_column_id(column_key)?;
        let (board_id, snapshot) = self.begin(&BoardEvent::ColumnUpdated(ColumnUpdated {
            column_key: column_key.to_string(),
            column_id: Some(column_id.clone()),
            updates: patch.clone(),
        }))?;

        let updated = match self.backend.update_column(&board_id, &column_id, &patch).await {
            Ok(column) => column,
            Err(e) => return Err(self.rollback(snapshot, "update column", e)),
        };
        if let Some(board) = self.board.as_mut() {
            let mut meta = updated.clone();
            meta.key = column_key.to_string();
            board.rekey_column(column_key, meta);
        }

        let updates = match serde_json::to_value(&updated).map_err(board_core::Error::from)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.announce(
            &board_id,
            BoardEvent::ColumnUpdated(ColumnUpdated {
                column_key: column_key.to_string(),
                column_id: Some(column_id),
                updates,
            }),
        )
        .await;
        Ok(updated)
    }

    /// Remove a column, moving its tasks to `move_tasks_to` if given
    pub async fn delete_column(&mut self, column_key: &str, move_tasks_to: Option<&str>) -> Result<()> {
        let column_id = self.durable_column_id(column_key)?;
        if let Some(target) = move_tasks_to {
            if target == column_key || self.joined_state()?.column(target).is_none() {
                return Err(board_core::Error::ColumnNotFound(target.to_string()).into());
            }
        }

        let deleted = ColumnDeleted {
            column_key: column_key.to_string(),
            column_id: Some(column_id.clone()),
            moved_to: move_tasks_to.map(str::to_string),
        };
        let (board_id, snapshot) = self.begin(&BoardEvent::ColumnDeleted(deleted.clone()))?;
        if let Err(e) = self
            .backend
            .delete_column(&board_id, &column_id, move_tasks_to)
            .await
        {
            return Err(self.rollback(snapshot, "delete column", e));
        }

        self.announce(&board_id, BoardEvent::ColumnDeleted(deleted))
            .await;
        Ok(())
    }

    // ============ Presence ============

    /// Tell the room this user is typing in a task
    pub async fn typing(&self, task_id: &str, user_name: Option<&str>) -> Result<()> {
        self.send_presence(BoardEvent::TaskTyping(TypingIndicator {
            task_id: task_id.to_string(),
            user_name: user_name.map(str::to_string),
        }))
        .await
    }

    /// Share this user's pointer position. The relay stamps the user id.
    pub async fn move_cursor(&self, position: Value) -> Result<()> {
        self.send_presence(BoardEvent::CursorMoved(CursorMoved {
            user_id: None,
            position,
        }))
        .await
    }

    async fn send_presence(&self, event: BoardEvent) -> Result<()> {
        let board_id = self.joined_board().ok_or(ClientError::NotJoined)?;
        let payload = event.to_payload(board_id)?;
        self.transport.emit(event.kind(), payload).await
    }

    // ============ Helpers ============

    fn joined_state(&self) -> Result<&BoardState> {
        if self.joined_board().is_none() {
            return Err(ClientError::NotJoined);
        }
        self.board.as_ref().ok_or(ClientError::NotJoined)
    }

    fn durable_column_id(&self, column_key: &str) -> Result<String> {
        let column = self
            .joined_state()?
            .column(column_key)
            .ok_or_else(|| board_core::Error::ColumnNotFound(column_key.to_string()))?;
        column.meta.id.clone().ok_or_else(|| {
            board_core::Error::InvalidInput(format!("column '{}' is not saved yet", column_key))
                .into()
        })
    }

    /// Snapshot the board and apply a local event to it
    fn begin(&mut self, event: &BoardEvent) -> Result<(String, BoardState)> {
        let board_id = self
            .joined_board()
            .map(str::to_string)
            .ok_or(ClientError::NotJoined)?;
        let board = self.board.as_mut().ok_or(ClientError::NotJoined)?;
        let snapshot = board.clone();

        match board.apply(event)? {
            ApplyOutcome::Ignored(IgnoreReason::UnknownColumn(key)) => {
                Err(board_core::Error::ColumnNotFound(key).into())
            }
            ApplyOutcome::Ignored(IgnoreReason::UnknownTask(id)) => {
                Err(board_core::Error::TaskNotFound(id).into())
            }
            ApplyOutcome::Ignored(reason) => Err(ClientError::invalid_move(reason.to_string())),
            ApplyOutcome::Applied | ApplyOutcome::Presence => Ok((board_id, snapshot)),
        }
    }

    /// Put the board back as it was before a failed write
    fn rollback(&mut self, snapshot: BoardState, action: &str, err: board_core::Error) -> ClientError {
        warn!("Failed to {}: {}", action, err);
        self.board = Some(snapshot);
        self.notice(NoticeLevel::Error, format!("Failed to {}: {}", action, err));
        err.into()
    }

    /// Tell the room about a write that already reached the backend
    async fn announce(&mut self, board_id: &str, event: BoardEvent) {
        let kind = event.kind();
        let sent = match event.to_payload(board_id) {
            Ok(payload) => self.transport.emit(kind, payload).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            warn!("Failed to send {}: {}", kind, e);
            self.notice(
                NoticeLevel::Warning,
                "Saved, but collaborators will only see it after a refresh",
            );
        }
    }
}

fn fields_of(task: &BoardTask) -> Result<Map<String, Value>> {
    match serde_json::to_value(task).map_err(board_core::Error::from)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}
