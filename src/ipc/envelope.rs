//! IPC message and reply types.
//!
//! Hosts address the worker with a loose envelope (`{id, method, params}`)
//! so new host versions can talk to old workers; the worker narrows each
//! envelope into the closed [`MethodCall`] enum before acting on it, and an
//! envelope naming a method this build does not know is reported as an
//! error rather than dispatched.

use crate::config::ChannelEndpoint;
use crate::error::{HearthError, Result};
use crate::registry::WorkerRecord;
use crate::server::{HostEvent, ProjectDescriptor, ServerConfig};
use serde::{Deserialize, Serialize};

/// Start (or attach to) the dev server.
pub const METHOD_SERVER_START: &str = "server.start";
/// Reply with the currently published server config.
pub const METHOD_SERVER_GET_CONFIG: &str = "server.get_config";
/// Stop the dev server.
pub const METHOD_SERVER_STOP: &str = "server.stop";
/// Forward an application runtime event to the dev server.
pub const METHOD_HOST_EVENT: &str = "host.event";

/// Wire envelope for host-to-worker messages.
///
/// The same envelope may arrive over several transports at once; `id` is the
/// deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl Envelope {
    /// Build an envelope for a call, with a fresh id.
    pub fn from_call(call: &MethodCall) -> Self {
        let (method, params) = match call {
            MethodCall::StartServer(options) => (
                METHOD_SERVER_START,
                vec![serde_json::to_value(options).unwrap_or(serde_json::Value::Null)],
            ),
            MethodCall::GetServerConfig => (METHOD_SERVER_GET_CONFIG, Vec::new()),
            MethodCall::StopServer => (METHOD_SERVER_STOP, Vec::new()),
            MethodCall::HostEvent(event) => (
                METHOD_HOST_EVENT,
                vec![serde_json::to_value(event).unwrap_or(serde_json::Value::Null)],
            ),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.to_string(),
            params,
        }
    }

    /// Narrow the envelope into a typed call.
    pub fn decode(&self) -> Result<MethodCall> {
        match self.method.as_str() {
            METHOD_SERVER_START => Ok(MethodCall::StartServer(self.param(0)?)),
            METHOD_SERVER_GET_CONFIG => Ok(MethodCall::GetServerConfig),
            METHOD_SERVER_STOP => Ok(MethodCall::StopServer),
            METHOD_HOST_EVENT => Ok(MethodCall::HostEvent(self.param(0)?)),
            other => Err(HearthError::UnknownMethod(other.to_string())),
        }
    }

    fn param<T: serde::de::DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self
            .params
            .get(index)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value).map_err(|e| HearthError::InvalidParams {
            method: self.method.clone(),
            detail: e.to_string(),
        })
    }
}

/// Parameters for [`MethodCall::StartServer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    pub descriptor: ProjectDescriptor,
    /// Pid of the host's own parent, watched for session death.
    pub host_parent_pid: u32,
    /// Real-time channel endpoint, when the application server is up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelEndpoint>,
}

/// Every method the worker understands.
///
/// Dispatch matches exhaustively on this enum; adding a method is a compile
/// error until every match arm is extended.
#[derive(Debug, Clone)]
pub enum MethodCall {
    StartServer(StartOptions),
    GetServerConfig,
    StopServer,
    HostEvent(HostEvent),
}

impl MethodCall {
    pub fn method_name(&self) -> &'static str {
        match self {
            MethodCall::StartServer(_) => METHOD_SERVER_START,
            MethodCall::GetServerConfig => METHOD_SERVER_GET_CONFIG,
            MethodCall::StopServer => METHOD_SERVER_STOP,
            MethodCall::HostEvent(_) => METHOD_HOST_EVENT,
        }
    }
}

/// Worker-to-host replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum Reply {
    /// The dev server's published runtime config.
    ServerConfig(ServerConfig),
    /// The client bundle needs a full page reload.
    RefreshNeeded,
    /// Snapshot of the worker record plus live listening state.
    WorkerState(WorkerState),
}

/// Record snapshot enriched with the dev server's live listening flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerState {
    #[serde(flatten)]
    pub record: WorkerRecord,
    pub listening: bool,
}
