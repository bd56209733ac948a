//! Child process plumbing: launching, stream multiplexing and signals.

pub mod launcher;
pub mod mux;
pub mod signal;

pub use launcher::{LaunchError, LaunchMode, LaunchSpec, Launched, inherited_env_with, launch};
pub use mux::{MuxConfig, StreamKind, TranscriptChunk, spawn_multiplexer};
pub use signal::Signal;
