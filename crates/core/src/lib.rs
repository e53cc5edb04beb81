//! Core library for the realtime Kanban board
//!
//! This crate contains the pieces shared by the relay server and the
//! board client:
//! - Board model (columns, tasks) and the reconciler that applies events
//! - The closed set of realtime events and their payloads
//! - The durable backend contract and an in-memory backend

pub mod backend;
pub mod board;
pub mod error;
pub mod event;

pub use backend::{BoardBackend, MemoryBackend};
pub use board::{
    ApplyOutcome, BoardColumn, BoardState, BoardTask, ColumnMeta, IgnoreReason, MovePolicy,
    TaskDraft, TaskMove, TaskRecord,
};
pub use error::Error;
pub use event::{BoardEvent, EventKind, RoomControl};

pub type Result<T> = std::result::Result<T, Error>;
