//! drover Supervisor Library
//!
//! Launches coding-agent CLIs as child processes, captures their combined
//! output as a durable transcript and drives each agent through its
//! lifecycle (`busy`, `waiting`, `complete`, `failed`, archived).

pub mod agent_cmd;
pub mod lifecycle;
pub mod storage;
pub mod subprocess;
pub mod transcript;
