//! Wire messages for the real-time application channel.
//!
//! The application server multiplexes method calls, acknowledgements, and
//! subscription feed events over one WebSocket. Every message is a JSON
//! object discriminated by its `msg` field.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "camelCase")]
pub enum ChannelMessage {
    /// Invoke a server method; the server answers with a `result` carrying
    /// the same id.
    Method {
        id: String,
        method: String,
        #[serde(default)]
        params: Vec<serde_json::Value>,
    },
    /// Acknowledgement for a previously sent method call.
    Result {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Document pushed on a subscription feed.
    Event {
        feed: String,
        id: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Ping,
    Pong,
}

/// Feed carrying host-to-worker envelopes.
pub const IPC_FEED: &str = "ipc";
/// Method acknowledging receipt of an envelope from the feed, so the server
/// can stop retransmitting it.
pub const METHOD_IPC_RECEIVED: &str = "ipc.received";
/// Method appending a worker log line to the server console.
pub const METHOD_LOG: &str = "log";
/// Method publishing the worker's current state snapshot.
pub const METHOD_STATUS_UPDATE: &str = "status.update";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_discriminator() {
        let msg = ChannelMessage::Method {
            id: "m1".into(),
            method: METHOD_LOG.into(),
            params: vec![serde_json::json!({"level": "info"})],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["msg"], "method");
        assert_eq!(json["method"], "log");
    }

    #[test]
    fn test_ping_roundtrip() {
        let json = serde_json::to_string(&ChannelMessage::Ping).unwrap();
        assert_eq!(json, r#"{"msg":"ping"}"#);
        assert!(matches!(
            serde_json::from_str(&json).unwrap(),
            ChannelMessage::Ping
        ));
    }

    #[test]
    fn test_result_without_error_field() {
        let msg: ChannelMessage =
            serde_json::from_str(r#"{"msg":"result","id":"m2","result":42}"#).unwrap();
        match msg {
            ChannelMessage::Result { id, result, error } => {
                assert_eq!(id, "m2");
                assert_eq!(result.unwrap(), 42);
                assert!(error.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
