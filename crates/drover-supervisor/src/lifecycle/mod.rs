//! Agent lifecycle: runs, commands and liveness.

pub mod command;
pub mod error;
pub mod error_file;
pub mod scratch;
pub mod supervisor;
pub mod sweep;

pub use command::{AgentCommand, Turn};
pub use error::{Result, SupervisorError};
pub use error_file::{clear_launch_error, launch_error_path, read_launch_error, write_launch_error};
pub use scratch::{ScratchHome, codex_home_source};
pub use supervisor::{
    EXIT_MESSAGE_KIND, QUESTION_MESSAGE_KIND, SpawnRequest, Supervisor, SupervisorOptions,
};
pub use sweep::spawn_liveness_sweep;
