//! Boundary to the development-server collaborator.
//!
//! The bundler integration (config resolution, stub generation, HTML
//! injection) is not part of this crate. The worker drives it through the
//! narrow [`DevServer`] interface and receives back zero-argument
//! notifications over a [`ServerNotice`] channel.

use crate::error::{HearthError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex};

/// Resolved project descriptor handed to the worker by the host build tool.
///
/// The worker does not parse or validate this beyond checking that the
/// required fields are present; it is passed through to the dev server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    /// Package name from the project manifest.
    pub package_name: String,
    /// Client entry file the dev server should serve.
    pub entry_file: PathBuf,
    /// Optional explicit dev-server config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

impl ProjectDescriptor {
    /// Check the fields no sensible default exists for.
    pub fn validate(&self) -> Result<()> {
        if self.package_name.is_empty() {
            return Err(HearthError::InvalidDescriptor(
                "missing package name".into(),
            ));
        }
        if self.entry_file.as_os_str().is_empty() {
            return Err(HearthError::InvalidDescriptor("missing entry file".into()));
        }
        Ok(())
    }
}

/// Runtime configuration published by the dev server once it listens.
///
/// Stored in the worker record and replied to the host, which uses it to
/// wire the running application to the dev server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_urls: Vec<String>,
}

/// Zero-argument notifications emitted by the dev server back to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerNotice {
    /// A (re)build started; the published config should be re-announced.
    BuildStarted,
    /// The client bundle changed in a way hot updates cannot cover.
    RefreshNeeded,
}

/// Opaque event forwarded from the host runtime to the dev server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEvent {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Narrow interface to the development server.
#[async_trait]
pub trait DevServer: Send + Sync {
    /// Start serving the project. Returns the published runtime config.
    ///
    /// `notices` stays open for the life of the server; the worker listens
    /// on the other end and converts notices into IPC replies.
    async fn start(
        &self,
        descriptor: &ProjectDescriptor,
        notices: mpsc::UnboundedSender<ServerNotice>,
    ) -> Result<ServerConfig>;

    /// Shut the server down. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Last published config, if the server has started.
    fn config(&self) -> Option<ServerConfig>;

    /// Whether the server is currently accepting connections.
    fn is_listening(&self) -> bool;

    /// Forward an opaque host runtime event.
    async fn ingest_host_event(&self, event: HostEvent) -> Result<()>;
}

/// Dev server run as an external child process.
///
/// This is the production collaborator used by `hearthd`: the actual bundler
/// dev server is a separate program named by the host, and this adapter only
/// manages its lifetime and publishes the address it was told to serve on.
pub struct CommandDevServer {
    command: String,
    args: Vec<String>,
    host: String,
    port: u16,
    child: Mutex<Option<tokio::process::Child>>,
    listening: AtomicBool,
    published: Mutex<Option<ServerConfig>>,
}

impl CommandDevServer {
    pub fn new(command: String, args: Vec<String>, host: String, port: u16) -> Self {
        Self {
            command,
            args,
            host,
            port,
            child: Mutex::new(None),
            listening: AtomicBool::new(false),
            published: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DevServer for CommandDevServer {
    async fn start(
        &self,
        descriptor: &ProjectDescriptor,
        _notices: mpsc::UnboundedSender<ServerNotice>,
    ) -> Result<ServerConfig> {
        let mut guard = self.child.lock().await;
        if guard.is_some() {
            // Already started; re-publish the existing config.
            if let Some(config) = self.published.lock().await.clone() {
                return Ok(config);
            }
        }

        let child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .arg(&descriptor.entry_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        tracing::info!(
            command = %self.command,
            pid = child.id().unwrap_or_default(),
            "dev server process started"
        );
        *guard = Some(child);
        self.listening.store(true, Ordering::SeqCst);

        let config = ServerConfig {
            host: Some(self.host.clone()),
            port: Some(self.port),
            entry_file: Some(descriptor.entry_file.display().to_string()),
            resolved_urls: vec![format!("http://{}:{}/", self.host, self.port)],
        };
        *self.published.lock().await = Some(config.clone());
        Ok(config)
    }

    async fn stop(&self) -> Result<()> {
        if let Some(mut child) = self.child.lock().await.take() {
            self.listening.store(false, Ordering::SeqCst);
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to kill dev server process: {}", e);
            }
        }
        Ok(())
    }

    fn config(&self) -> Option<ServerConfig> {
        self.published.try_lock().ok().and_then(|g| g.clone())
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    async fn ingest_host_event(&self, event: HostEvent) -> Result<()> {
        // The external process has no event intake; record it for operators.
        tracing::debug!(kind = %event.kind, "host event ignored by external dev server");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_requires_package_name() {
        let descriptor = ProjectDescriptor {
            package_name: String::new(),
            entry_file: PathBuf::from("src/main.ts"),
            config_file: None,
        };
        assert!(matches!(
            descriptor.validate(),
            Err(HearthError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_descriptor_requires_entry_file() {
        let descriptor = ProjectDescriptor {
            package_name: "app".into(),
            entry_file: PathBuf::new(),
            config_file: None,
        };
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_server_config_skips_empty_fields() {
        let json = serde_json::to_string(&ServerConfig::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_server_config_roundtrip() {
        let config = ServerConfig {
            host: Some("127.0.0.1".into()),
            port: Some(5173),
            entry_file: Some("src/main.ts".into()),
            resolved_urls: vec!["http://127.0.0.1:5173/".into()],
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["port"], 5173);
        let parsed: ServerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }
}
