//! Sessions collaborating through an in-process relay

use std::sync::Arc;

use async_trait::async_trait;
use board_client::{BoardSession, ClientError, ConnectionState, NoticeLevel, RealtimeTransport};
use board_core::{
    ApplyOutcome, BoardBackend, BoardState, EventKind, IgnoreReason, MemoryBackend, RoomControl,
    TaskDraft,
};
use chrono::Duration;
use relay_server::{Delivery, Relay, TokenVerifier};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

const SECRET: &str = "test-secret";

/// Transport that talks to a [`Relay`] directly instead of over a socket
struct RelayTransport {
    relay: Arc<Relay>,
    verifier: TokenVerifier,
    connection_id: String,
    inbox: Mutex<Option<mpsc::Receiver<Delivery>>>,
}

impl RelayTransport {
    fn new(relay: &Arc<Relay>, connection_id: &str) -> Arc<Self> {
        Arc::new(Self {
            relay: Arc::clone(relay),
            verifier: TokenVerifier::new(SECRET),
            connection_id: connection_id.to_string(),
            inbox: Mutex::new(None),
        })
    }

    /// Hand every queued delivery to the session
    async fn pump(&self, session: &mut BoardSession) -> Vec<ApplyOutcome> {
        let mut inbox = self.inbox.lock().await;
        let mut outcomes = Vec::new();
        if let Some(rx) = inbox.as_mut() {
            while let Ok(delivery) = rx.try_recv() {
                if let Some(outcome) = session
                    .handle_remote(delivery.event, delivery.payload)
                    .unwrap()
                {
                    outcomes.push(outcome);
                }
            }
        }
        outcomes
    }
}

#[async_trait]
impl RealtimeTransport for RelayTransport {
    async fn connect(&self, token: &str) -> board_client::Result<()> {
        let principal = self
            .verifier
            .verify(token)
            .map_err(|e| ClientError::handshake(e.to_string()))?;
        let (tx, rx) = mpsc::channel(64);
        self.relay
            .register(self.connection_id.clone(), principal, tx)
            .await;
        *self.inbox.lock().await = Some(rx);
        Ok(())
    }

    async fn room(&self, control: RoomControl, board_id: &str) -> board_client::Result<()> {
        match control {
            RoomControl::Join => {
                self.relay
                    .join(&self.connection_id, board_id)
                    .await
                    .map_err(|e| ClientError::transport(e.to_string()))?;
            }
            RoomControl::Leave => {
                self.relay.leave(&self.connection_id, board_id).await;
            }
        }
        Ok(())
    }

    async fn emit(&self, kind: EventKind, payload: Value) -> board_client::Result<()> {
        self.relay
            .relay(&self.connection_id, kind, payload)
            .await
            .map_err(|e| ClientError::transport(e.to_string()))?;
        Ok(())
    }

    async fn disconnect(&self) -> board_client::Result<()> {
        self.relay.disconnect(&self.connection_id).await;
        Ok(())
    }
}

fn token(user_id: &str) -> String {
    TokenVerifier::new(SECRET)
        .issue(user_id, Some("member"), Duration::hours(1))
        .unwrap()
}

async fn seeded_backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.add_column("p1", "todo", "To Do").await.unwrap();
    backend.add_column("p1", "done", "Done").await.unwrap();
    backend
}

async fn fresh_load(backend: &MemoryBackend, board_id: &str) -> BoardState {
    BoardState::assemble(
        board_id,
        backend.fetch_columns(board_id).await.unwrap(),
        backend.fetch_tasks(board_id).await.unwrap(),
    )
}

async fn open_session(
    backend: &MemoryBackend,
    relay: &Arc<Relay>,
    name: &str,
    board_id: &str,
) -> (BoardSession, Arc<RelayTransport>) {
    let transport = RelayTransport::new(relay, name);
    let mut session = BoardSession::new(
        Arc::new(backend.clone()),
        transport.clone(),
        token(&format!("user-{name}")),
    );
    session.open(board_id).await.unwrap();
    (session, transport)
}

#[tokio::test]
async fn test_created_task_reaches_collaborator() {
    let backend = seeded_backend().await;
    let relay = Arc::new(Relay::new());
    let (mut a, a_link) = open_session(&backend, &relay, "a", "p1").await;
    let (mut b, b_link) = open_session(&backend, &relay, "b", "p1").await;

    let task = a
        .create_task(TaskDraft::new("todo", "Write docs"))
        .await
        .unwrap();

    let a_board = a.board().unwrap();
    assert_eq!(a_board.tasks("todo").len(), 1);
    assert_eq!(a_board.tasks("todo")[0].id, task.id);
    assert!(!task.id.starts_with("local-"));

    let outcomes = b_link.pump(&mut b).await;
    assert_eq!(outcomes, vec![ApplyOutcome::Applied]);
    assert_eq!(b.board().unwrap().tasks("todo").len(), 1);
    assert_eq!(b.board().unwrap().tasks("todo")[0].title, "Write docs");

    // The relay never echoes to the sender
    assert!(a_link.pump(&mut a).await.is_empty());
}

#[tokio::test]
async fn test_other_boards_hear_nothing() {
    let backend = seeded_backend().await;
    let relay = Arc::new(Relay::new());
    let (mut a, _) = open_session(&backend, &relay, "a", "p1").await;
    let (mut c, c_link) = open_session(&backend, &relay, "c", "p2").await;

    a.create_task(TaskDraft::new("todo", "Only for p1"))
        .await
        .unwrap();

    assert!(c_link.pump(&mut c).await.is_empty());
    assert_eq!(c.board().unwrap().task_count(), 0);
}

#[tokio::test]
async fn test_moves_and_column_changes_stay_in_step() {
    let backend = seeded_backend().await;
    let relay = Arc::new(Relay::new());
    let (mut a, _) = open_session(&backend, &relay, "a", "p1").await;
    let (mut b, b_link) = open_session(&backend, &relay, "b", "p1").await;

    for title in ["one", "two", "three"] {
        a.create_task(TaskDraft::new("todo", title)).await.unwrap();
    }
    a.move_task("todo", 0, "done", 0).await.unwrap();
    a.move_task("todo", 1, "todo", 0).await.unwrap();
    b_link.pump(&mut b).await;

    let titles = |session: &BoardSession, key: &str| -> Vec<String> {
        session
            .board()
            .unwrap()
            .tasks(key)
            .iter()
            .map(|task| task.title.clone())
            .collect()
    };
    assert_eq!(titles(&a, "todo"), vec!["three", "two"]);
    assert_eq!(titles(&b, "todo"), vec!["three", "two"]);
    assert_eq!(titles(&b, "done"), vec!["one"]);

    let review = a.create_column("Review", Some("#abcdef")).await.unwrap();
    let mut rename = serde_json::Map::new();
    rename.insert("name".to_string(), json!("QA"));
    a.update_column(&review.key, rename).await.unwrap();
    b_link.pump(&mut b).await;

    let b_column = b.board().unwrap().column(&review.key).unwrap();
    assert_eq!(b_column.meta.name, "QA");

    a.delete_column("todo", Some("done")).await.unwrap();
    b_link.pump(&mut b).await;

    let b_board = b.board().unwrap();
    assert!(b_board.column("todo").is_none());
    assert_eq!(b_board.tasks("done").len(), 3);
    assert_eq!(a.board().unwrap().task_count(), 3);
}

#[tokio::test]
async fn test_reconnect_matches_fresh_load() {
    let backend = seeded_backend().await;
    let relay = Arc::new(Relay::new());
    let (mut a, _) = open_session(&backend, &relay, "a", "p1").await;
    let (mut b, b_link) = open_session(&backend, &relay, "b", "p1").await;

    a.create_task(TaskDraft::new("todo", "before")).await.unwrap();
    b_link.pump(&mut b).await;

    // B drops off and misses the next changes
    relay.disconnect("b").await;
    b.connection_lost();
    assert_eq!(b.connection_state(), &ConnectionState::Disconnected);

    a.create_task(TaskDraft::new("done", "missed")).await.unwrap();
    a.move_task("todo", 0, "done", 1).await.unwrap();

    b.reconnect().await.unwrap();

    assert_eq!(b.connection_state(), &ConnectionState::Joined("p1".to_string()));
    assert_eq!(b.board().unwrap(), &fresh_load(&backend, "p1").await);
    assert!(b
        .drain_notices()
        .iter()
        .any(|notice| notice.level == NoticeLevel::Info));
}

#[tokio::test]
async fn test_failed_write_rolls_back() {
    let backend = seeded_backend().await;
    let relay = Arc::new(Relay::new());
    let (mut a, _) = open_session(&backend, &relay, "a", "p1").await;
    let (mut b, b_link) = open_session(&backend, &relay, "b", "p1").await;
    a.create_task(TaskDraft::new("todo", "kept")).await.unwrap();
    b_link.pump(&mut b).await;
    let before = a.board().unwrap().clone();
    a.drain_notices();

    backend.set_offline(true);
    let result = a.create_task(TaskDraft::new("todo", "lost")).await;
    assert!(result.is_err());
    assert_eq!(a.board().unwrap(), &before);

    let result = a.move_task("todo", 0, "done", 0).await;
    assert!(result.is_err());
    assert_eq!(a.board().unwrap(), &before);

    let notices = a.drain_notices();
    assert_eq!(notices.len(), 2);
    assert!(notices.iter().all(|notice| notice.level == NoticeLevel::Error));
    assert!(b_link.pump(&mut b).await.is_empty());
}

#[tokio::test]
async fn test_failed_fetch_keeps_last_board() {
    let backend = seeded_backend().await;
    let relay = Arc::new(Relay::new());
    let (mut a, _) = open_session(&backend, &relay, "a", "p1").await;
    a.create_task(TaskDraft::new("todo", "cached")).await.unwrap();

    backend.set_offline(true);
    assert!(a.open("p1").await.is_err());

    let board = a.board().unwrap();
    assert_eq!(board.tasks("todo")[0].title, "cached");
    assert!(!a.drain_notices().is_empty());
}

#[tokio::test]
async fn test_failed_switch_stays_on_current_board() {
    let backend = seeded_backend().await;
    let relay = Arc::new(Relay::new());
    let (mut a, a_link) = open_session(&backend, &relay, "a", "p1").await;
    let (mut b, _) = open_session(&backend, &relay, "b", "p1").await;

    backend.set_offline(true);
    assert!(a.open("p2").await.is_err());

    assert_eq!(a.connection_state(), &ConnectionState::Joined("p1".to_string()));
    assert_eq!(a.board().unwrap().board_id(), "p1");
    assert_eq!(relay.rooms_of("a").await, vec!["p1".to_string()]);

    // Still hears the board it is showing
    backend.set_offline(false);
    b.create_task(TaskDraft::new("todo", "after switch"))
        .await
        .unwrap();
    assert_eq!(a_link.pump(&mut a).await, vec![ApplyOutcome::Applied]);

    // A later reconnect goes back to p1, not the board that failed to load
    relay.disconnect("a").await;
    a.connection_lost();
    a.reconnect().await.unwrap();
    assert_eq!(a.joined_board(), Some("p1"));
}

#[tokio::test]
async fn test_unsupported_room_events_are_ignored() {
    let backend = seeded_backend().await;
    let relay = Arc::new(Relay::new());
    let (mut a, _) = open_session(&backend, &relay, "a", "p1").await;
    let before = a.board().unwrap().clone();

    let outcome = a
        .handle_remote(
            "column:tasks-moved",
            json!({ "projectId": "p1", "fromColumn": "todo", "toColumn": "done" }),
        )
        .unwrap();

    assert_eq!(
        outcome,
        Some(ApplyOutcome::Ignored(IgnoreReason::UnsupportedEvent(
            "column:tasks-moved".to_string()
        )))
    );
    assert_eq!(a.board().unwrap(), &before);
}

#[tokio::test]
async fn test_bad_token_is_refused() {
    let backend = seeded_backend().await;
    let relay = Arc::new(Relay::new());
    let transport = RelayTransport::new(&relay, "intruder");
    let mut session = BoardSession::new(Arc::new(backend), transport, "not-a-token");

    let result = session.open("p1").await;

    assert!(matches!(result, Err(ClientError::Handshake { .. })));
    assert_eq!(session.connection_state(), &ConnectionState::Disconnected);
    assert_eq!(relay.connection_count().await, 0);
}

#[tokio::test]
async fn test_mutations_need_a_joined_board() {
    let backend = seeded_backend().await;
    let relay = Arc::new(Relay::new());
    let (mut a, _) = open_session(&backend, &relay, "a", "p1").await;
    a.leave().await.unwrap();

    let result = a.create_task(TaskDraft::new("todo", "nope")).await;
    assert!(matches!(result, Err(ClientError::NotJoined)));
    assert_eq!(
        a.handle_remote("task:deleted", json!({ "projectId": "p1", "taskId": "x", "columnKey": "todo" }))
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_presence_is_relayed_without_changing_the_board() {
    let backend = seeded_backend().await;
    let relay = Arc::new(Relay::new());
    let (a, _) = open_session(&backend, &relay, "a", "p1").await;
    let (mut b, b_link) = open_session(&backend, &relay, "b", "p1").await;
    let before = b.board().unwrap().clone();

    a.typing("t1", Some("Dana")).await.unwrap();
    a.move_cursor(json!({ "x": 10, "y": 20 })).await.unwrap();

    let outcomes = b_link.pump(&mut b).await;
    assert_eq!(outcomes, vec![ApplyOutcome::Presence, ApplyOutcome::Presence]);
    assert_eq!(b.board().unwrap(), &before);
}
