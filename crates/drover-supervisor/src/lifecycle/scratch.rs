//! Per-run private `CODEX_HOME`.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

/// Files copied from the operator's Codex home into each scratch home.
const SEEDED_FILES: &[&str] = &["auth.json", "config.toml"];

/// A temporary Codex home owned by exactly one run. The directory and
/// everything the agent wrote into it are removed on drop.
#[derive(Debug)]
pub struct ScratchHome {
    dir: TempDir,
}

impl ScratchHome {
    /// Create the directory and seed it from `source` when given.
    pub fn prepare(source: Option<&Path>) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("drover-codex-").tempdir()?;

        if let Some(source) = source {
            for name in SEEDED_FILES {
                let from = source.join(name);
                if from.is_file() {
                    std::fs::copy(&from, dir.path().join(name))?;
                }
            }
        }

        debug!(path = %dir.path().display(), "Scratch CODEX_HOME prepared");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Configured Codex home, falling back to `~/.codex`.
pub fn codex_home_source(configured: Option<&Path>) -> Option<PathBuf> {
    configured
        .map(Path::to_path_buf)
        .or_else(|| dirs::home_dir().map(|h| h.join(".codex")))
}
