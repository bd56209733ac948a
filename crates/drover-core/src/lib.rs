//! drover Core Library
//!
//! Shared functionality for drover components:
//! - Event protocol decoding for protocol-emitting agents
//! - Configuration resolution and hierarchy
//! - `SQLite` pool helpers and the `define_database!` macro
//! - Common error types and tracing setup

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{Event, Item, ItemKind};
