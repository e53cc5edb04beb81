//! Kanban board model and reconciliation
//!
//! This module provides the client-side board model (columns holding
//! ordered task lists) and the rules for applying realtime events to it.

mod model;
mod state;

pub use model::*;
pub use state::*;
