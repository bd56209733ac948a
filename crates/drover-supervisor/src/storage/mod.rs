//! `SQLite` storage for the drover supervisor.
//!
//! Persists agents, transcript log entries and messages. The lifecycle
//! code reaches storage only through the [`AgentStore`] trait.

mod db;
mod models;
mod queries;
mod queries_logs;
mod store;

pub use db::{Database, DatabaseError};
pub use models::*;
pub use store::AgentStore;
