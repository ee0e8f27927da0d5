//! Paths and environment configuration for the worker process.
//!
//! Everything the worker persists lives under the project's local build
//! output tree at `.hearth/local/`. The state file location can be overridden
//! with `HEARTH_STATE_PATH`; the remaining variables toggle diagnostics.

use crate::error::{HearthError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the worker state file path.
pub const STATE_PATH_ENV: &str = "HEARTH_STATE_PATH";
/// Environment variable enabling verbose diagnostic logging.
pub const DEBUG_ENV: &str = "HEARTH_DEBUG";
/// Environment variable disabling the CI summary side channel.
pub const CI_SUMMARY_ENV: &str = "HEARTH_CI_SUMMARY";
/// Environment variable carrying a fallback channel endpoint as JSON
/// (`{"host": "...", "port": ...}`), consulted when `server.start` params
/// omit one.
pub const APP_RUNTIME_ENV: &str = "HEARTH_APP_RUNTIME";

/// Get the project-local data directory (`<root>/.hearth/local`).
pub fn local_dir(project_root: &Path) -> PathBuf {
    project_root.join(".hearth").join("local")
}

/// Get the worker state file path.
///
/// Honors `HEARTH_STATE_PATH` when set; otherwise defaults to
/// `<root>/.hearth/local/worker-state.json`.
pub fn worker_state_path(project_root: &Path) -> PathBuf {
    match std::env::var_os(STATE_PATH_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => local_dir(project_root).join("worker-state.json"),
    }
}

/// Get the worker log directory (`<root>/.hearth/local/logs`).
///
/// The worker's stdout belongs to the stdio transport, so diagnostics are
/// written here instead.
pub fn logs_dir(project_root: &Path) -> PathBuf {
    local_dir(project_root).join("logs")
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Whether verbose diagnostic logging was requested via `HEARTH_DEBUG`.
pub fn debug_enabled() -> bool {
    matches!(
        std::env::var(DEBUG_ENV).as_deref(),
        Ok("1") | Ok("true") | Ok("*")
    )
}

/// Whether the CI summary side channel is enabled.
///
/// Defaults to on; set `HEARTH_CI_SUMMARY=0` to disable. The summary writer
/// itself lives with the presentation layer, this is configuration only.
pub fn ci_summary_enabled() -> bool {
    !matches!(
        std::env::var(CI_SUMMARY_ENV).as_deref(),
        Ok("0") | Ok("false")
    )
}

/// Address of the real-time application server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEndpoint {
    pub host: String,
    pub port: u16,
}

impl ChannelEndpoint {
    /// WebSocket URL for the application server's channel socket.
    pub fn url(&self) -> String {
        format!("ws://{}:{}/websocket", self.host, self.port)
    }
}

/// Read the fallback channel endpoint from `HEARTH_APP_RUNTIME`.
///
/// Returns `Ok(None)` when the variable is unset. A present but malformed
/// value is a configuration error: there is no sensible default to fall
/// back to.
pub fn channel_endpoint_from_env() -> Result<Option<ChannelEndpoint>> {
    let Ok(raw) = std::env::var(APP_RUNTIME_ENV) else {
        return Ok(None);
    };
    let endpoint: ChannelEndpoint = serde_json::from_str(&raw).map_err(|e| {
        HearthError::ChannelEndpoint(format!("failed to parse {}: {}", APP_RUNTIME_ENV, e))
    })?;
    Ok(Some(endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_dir_layout() {
        let dir = local_dir(Path::new("/proj"));
        assert_eq!(dir, PathBuf::from("/proj/.hearth/local"));
    }

    #[test]
    fn test_default_state_path() {
        // Only valid while the override env var is unset in the test runner.
        if std::env::var_os(STATE_PATH_ENV).is_none() {
            let path = worker_state_path(Path::new("/proj"));
            assert!(path.ends_with(".hearth/local/worker-state.json"));
        }
    }

    #[test]
    fn test_logs_dir_under_local() {
        let dir = logs_dir(Path::new("/proj"));
        assert!(dir.ends_with(".hearth/local/logs"));
    }

    #[test]
    fn test_ci_summary_defaults_on() {
        // Only valid while the toggle env var is unset in the test runner.
        if std::env::var_os(CI_SUMMARY_ENV).is_none() {
            assert!(ci_summary_enabled());
        }
    }

    #[test]
    fn test_channel_endpoint_url() {
        let endpoint = ChannelEndpoint {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        assert_eq!(endpoint.url(), "ws://127.0.0.1:3000/websocket");
    }

    #[test]
    fn test_ensure_parent_dir_creates_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("state.json");
        ensure_parent_dir(&path).unwrap();
        assert!(path.parent().unwrap().exists());
    }
}
