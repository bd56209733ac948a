//! Launch-error side channel: one plain-text file per agent.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::storage::AgentId;

/// `<state_dir>/errors/<scope>/<name>.err`, with both components made safe
/// for use as a single path segment.
pub fn launch_error_path(state_dir: &Path, agent: &AgentId) -> PathBuf {
    state_dir
        .join("errors")
        .join(sanitize(&agent.scope))
        .join(format!("{}.err", sanitize(&agent.name)))
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".repeat(cleaned.len().max(1))
    } else {
        cleaned
    }
}

/// Write `message` to the agent's error file, replacing any previous one.
pub async fn write_launch_error(
    state_dir: &Path,
    agent: &AgentId,
    message: &str,
) -> io::Result<PathBuf> {
    let path = launch_error_path(state_dir, agent);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, format!("{message}\n")).await?;
    Ok(path)
}

/// Read the agent's error file, `None` if there is none.
pub async fn read_launch_error(state_dir: &Path, agent: &AgentId) -> io::Result<Option<String>> {
    match tokio::fs::read_to_string(launch_error_path(state_dir, agent)).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove a stale error file before a new run.
pub async fn clear_launch_error(state_dir: &Path, agent: &AgentId) {
    match tokio::fs::remove_file(launch_error_path(state_dir, agent)).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(agent = %agent, error = %e, "Failed to remove stale launch error file"),
    }
}
