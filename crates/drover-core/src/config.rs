//! Configuration resolution for drover.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/drover/settings.json)
//! 3. Project config (.drover/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete drover configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Supervisor-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub database_path: Option<PathBuf>,
    /// Root for side-channel artifacts such as launch-error files.
    pub state_dir: Option<PathBuf>,
    pub log_level: String,
    /// Read buffer size per stream in the multiplexer, in bytes.
    pub chunk_size: usize,
    /// Capacity of the bounded transcript chunk channel.
    pub channel_capacity: usize,
    pub sweep_interval_secs: u64,
    /// Seconds to wait after SIGTERM before escalating to SIGKILL.
    pub terminate_timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            state_dir: None,
            log_level: "info".to_string(),
            chunk_size: 4096,
            channel_capacity: 64,
            sweep_interval_secs: 30,
            terminate_timeout_secs: 5,
        }
    }
}

/// Per-flavor agent executables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub codex_bin: PathBuf,
    pub codex_args: Vec<String>,
    /// Directory whose `auth.json`/`config.toml` seed each run's private
    /// `CODEX_HOME`. Defaults to `~/.codex`.
    pub codex_home: Option<PathBuf>,
    pub claude_bin: PathBuf,
    pub claude_args: Vec<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            codex_bin: PathBuf::from("codex"),
            codex_args: Vec::new(),
            codex_home: None,
            claude_bin: PathBuf::from("claude"),
            claude_args: Vec::new(),
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// Each file only overrides the keys it sets; everything else keeps the
/// value from the layer below.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global)?;
        }
    }

    // Load project config
    if let Some(dir) = project_dir {
        let project_path = dir.join(".drover").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project)?;
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_root().map(|p| p.join("settings.json"))
}

/// Default database path for the supervisor.
pub fn database_path() -> Option<PathBuf> {
    config_root().map(|p| p.join("drover.db"))
}

/// Default state directory (launch-error files).
pub fn state_dir() -> Option<PathBuf> {
    config_root().map(|p| p.join("state"))
}

fn config_root() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".drover"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/drover"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("drover"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let overlay: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    // Reject files whose keys have the wrong shape before they are layered.
    serde_json::from_value::<Config>(overlay.clone()).map_err(|e| {
        Error::Config(format!("Invalid config file {}: {}", path.display(), e))
    })?;
    Ok(overlay)
}

/// Layer the keys present in `overlay` onto `base`.
fn merge_config(base: &mut Config, overlay: Value) -> Result<()> {
    let mut merged = serde_json::to_value(&*base)?;
    merge_value(&mut merged, overlay);
    *base = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid merged config: {e}")))?;
    Ok(())
}

fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_value(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("DROVER_DB_PATH") {
        config.supervisor.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = var("DROVER_STATE_DIR") {
        config.supervisor.state_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = var("DROVER_LOG_LEVEL") {
        config.supervisor.log_level = val;
    }
    if let Some(n) = var("DROVER_CHUNK_SIZE").and_then(|v| v.parse().ok()) {
        config.supervisor.chunk_size = n;
    }
    if let Some(n) = var("DROVER_SWEEP_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        config.supervisor.sweep_interval_secs = n;
    }
    if let Some(val) = var("DROVER_CODEX_BIN") {
        config.agents.codex_bin = PathBuf::from(val);
    }
    if let Some(val) = var("DROVER_CLAUDE_BIN") {
        config.agents.claude_bin = PathBuf::from(val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunk_size_is_a_few_kb() {
        let config = Config::default();
        assert_eq!(config.supervisor.chunk_size, 4096);
        assert_eq!(config.supervisor.channel_capacity, 64);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"supervisor":{"chunk_size":16}}"#).unwrap();
        assert_eq!(config.supervisor.chunk_size, 16);
        assert_eq!(config.supervisor.sweep_interval_secs, 30);
        assert_eq!(config.agents.codex_bin, PathBuf::from("codex"));
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".drover")).unwrap();
        std::fs::write(
            dir.path().join(".drover").join("settings.json"),
            r#"{"agents":{"claude_bin":"/opt/claude/bin/claude"}}"#,
        )
        .unwrap();

        let overlay = load_config_file(&dir.path().join(".drover/settings.json")).unwrap();
        let mut config = Config::default();
        merge_config(&mut config, overlay).unwrap();
        assert_eq!(
            config.agents.claude_bin,
            PathBuf::from("/opt/claude/bin/claude")
        );
    }

    #[test]
    fn project_layer_keeps_global_keys_it_does_not_set() {
        let mut config = Config::default();
        merge_config(
            &mut config,
            serde_json::json!({
                "supervisor": {"chunk_size": 16, "sweep_interval_secs": 5, "log_level": "debug"},
                "agents": {"codex_bin": "/opt/codex", "codex_args": ["--profile", "ci"]}
            }),
        )
        .unwrap();
        merge_config(
            &mut config,
            serde_json::json!({"agents": {"claude_bin": "/opt/claude"}}),
        )
        .unwrap();

        assert_eq!(config.supervisor.chunk_size, 16);
        assert_eq!(config.supervisor.sweep_interval_secs, 5);
        assert_eq!(config.supervisor.log_level, "debug");
        assert_eq!(config.agents.codex_bin, PathBuf::from("/opt/codex"));
        assert_eq!(config.agents.codex_args, ["--profile", "ci"]);
        assert_eq!(config.agents.claude_bin, PathBuf::from("/opt/claude"));
    }

    #[test]
    fn later_layer_overrides_earlier_value() {
        let mut config = Config::default();
        merge_config(&mut config, serde_json::json!({"supervisor": {"chunk_size": 16}})).unwrap();
        merge_config(&mut config, serde_json::json!({"supervisor": {"chunk_size": 32}})).unwrap();
        assert_eq!(config.supervisor.chunk_size, 32);
    }

    #[test]
    fn wrongly_typed_key_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"supervisor":{"chunk_size":"large"}}"#).unwrap();
        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "DROVER_CHUNK_SIZE" => Some("128".to_string()),
            "DROVER_CODEX_BIN" => Some("/usr/local/bin/codex".to_string()),
            "DROVER_SWEEP_INTERVAL_SECS" => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(config.supervisor.chunk_size, 128);
        assert_eq!(config.agents.codex_bin, PathBuf::from("/usr/local/bin/codex"));
        assert_eq!(config.supervisor.sweep_interval_secs, 30);
    }
}
