//! Reconnecting client for the application server's WebSocket channel.
//!
//! The application server restarts constantly during development, so the
//! connection is treated as ephemeral: the client reconnects unconditionally
//! one second after any failure or close, fails in-flight calls on
//! disconnect instead of queueing them, and deduplicates feed events that
//! the server retransmits across reconnects.

use crate::error::{HearthError, Result};
use crate::ipc::envelope::Envelope;
use crate::realtime::wire::{ChannelMessage, IPC_FEED, METHOD_IPC_RECEIVED};
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const PING_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct RealtimeClient {
    url: String,
    outbound: mpsc::UnboundedSender<ChannelMessage>,
    envelopes: mpsc::UnboundedSender<Envelope>,
    pending: Mutex<HashMap<String, oneshot::Sender<std::result::Result<serde_json::Value, String>>>>,
    seen_events: Mutex<HashSet<String>>,
    state: Mutex<ConnectionState>,
    last_connected_at: Mutex<Option<std::time::Instant>>,
    pings_sent: AtomicU64,
}

impl RealtimeClient {
    /// Connect to `url` and keep the connection alive in the background.
    ///
    /// Envelopes arriving on the `ipc` feed are pushed to `envelopes`.
    /// Returns immediately; the first connection attempt happens on the
    /// spawned task.
    pub fn connect(url: String, envelopes: mpsc::UnboundedSender<Envelope>) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            url,
            outbound: outbound_tx,
            envelopes,
            pending: Mutex::new(HashMap::new()),
            seen_events: Mutex::new(HashSet::new()),
            state: Mutex::new(ConnectionState::Disconnected),
            last_connected_at: Mutex::new(None),
            pings_sent: AtomicU64::new(0),
        });
        tokio::spawn(client.clone().run(outbound_rx));
        client
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Pings sent over the lifetime of the client, across reconnects.
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::Relaxed)
    }

    /// When the current or most recent connection was established.
    pub fn last_connected_at(&self) -> Option<std::time::Instant> {
        *self.last_connected_at.lock().unwrap()
    }

    /// Invoke a server method and wait for its acknowledgement.
    ///
    /// Fails fast when disconnected; callers that can tolerate loss should
    /// check [`is_connected`](Self::is_connected) and fall back locally.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        if !self.is_connected() {
            return Err(HearthError::ChannelCall(format!(
                "{}: channel disconnected",
                method
            )));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);
        self.send(ChannelMessage::Method {
            id: id.clone(),
            method: method.to_string(),
            params,
        });

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(HearthError::ChannelCall(format!("{}: {}", method, error))),
            Err(_) => Err(HearthError::ChannelCall(format!(
                "{}: channel closed before reply",
                method
            ))),
        }
    }

    fn send(&self, message: ChannelMessage) {
        // Receiver lives as long as the run task; a send failure means the
        // client is shutting down and the message can be dropped.
        let _ = self.outbound.send(message);
    }

    /// Process one inbound channel message.
    fn ingest(&self, message: ChannelMessage) {
        match message {
            ChannelMessage::Result { id, result, error } => {
                let waiter = self.pending.lock().unwrap().remove(&id);
                match waiter {
                    Some(tx) => {
                        let outcome = match error {
                            Some(e) => Err(e),
                            None => Ok(result.unwrap_or(serde_json::Value::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                    None => tracing::debug!(id = %id, "result for unknown call"),
                }
            }
            ChannelMessage::Event { feed, id, payload } => {
                if feed != IPC_FEED {
                    return;
                }
                if !self.seen_events.lock().unwrap().insert(id.clone()) {
                    tracing::debug!(id = %id, "duplicate feed event dropped");
                    return;
                }
                // Acknowledge only after a successful handoff; a failed event
                // stays marked handled locally but is never acked, so the
                // server keeps it visible.
                match serde_json::from_value::<Envelope>(payload) {
                    Ok(envelope) => {
                        if self.envelopes.send(envelope).is_ok() {
                            self.send(ChannelMessage::Method {
                                id: uuid::Uuid::new_v4().to_string(),
                                method: METHOD_IPC_RECEIVED.to_string(),
                                params: vec![serde_json::Value::String(id.clone())],
                            });
                        } else {
                            tracing::warn!(id = %id, "feed envelope dropped; sink closed");
                        }
                    }
                    Err(e) => tracing::warn!(id = %id, "malformed feed payload: {}", e),
                }
            }
            ChannelMessage::Ping => self.send(ChannelMessage::Pong),
            ChannelMessage::Pong => {}
            ChannelMessage::Method { method, .. } => {
                tracing::debug!(method = %method, "ignoring server-initiated method")
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Fail every in-flight call. Called on disconnect.
    fn drain_pending(&self) {
        let waiters: Vec<_> = self.pending.lock().unwrap().drain().collect();
        for (_, tx) in waiters {
            let _ = tx.send(Err("channel disconnected".to_string()));
        }
    }

    async fn run(self: Arc<Self>, mut outbound: mpsc::UnboundedReceiver<ChannelMessage>) {
        loop {
            self.set_state(ConnectionState::Connecting);
            match connect_async(&self.url).await {
                Ok((stream, _)) => {
                    tracing::info!(url = %self.url, "channel connected");
                    *self.last_connected_at.lock().unwrap() = Some(std::time::Instant::now());
                    self.set_state(ConnectionState::Connected);
                    self.serve_connection(stream, &mut outbound).await;
                    self.set_state(ConnectionState::Disconnected);
                    self.drain_pending();
                    tracing::info!("channel disconnected; retrying");
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    tracing::debug!(url = %self.url, "channel connect failed: {}", e);
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn serve_connection<S>(
        &self,
        stream: tokio_tungstenite::WebSocketStream<S>,
        outbound: &mut mpsc::UnboundedReceiver<ChannelMessage>,
    ) where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut write, mut read) = stream.split();
        let mut ping_tick = tokio::time::interval(PING_INTERVAL);
        ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick.
        ping_tick.tick().await;

        loop {
            tokio::select! {
                message = outbound.recv() => {
                    let Some(message) = message else { return };
                    let Ok(json) = serde_json::to_string(&message) else { continue };
                    if write.send(Message::Text(json)).await.is_err() {
                        return;
                    }
                }
                _ = ping_tick.tick() => {
                    self.pings_sent.fetch_add(1, Ordering::Relaxed);
                    let Ok(json) = serde_json::to_string(&ChannelMessage::Ping) else { continue };
                    if write.send(Message::Text(json)).await.is_err() {
                        return;
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ChannelMessage>(&text) {
                                Ok(message) => self.ingest(message),
                                Err(e) => tracing::debug!("unparseable channel frame: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!("channel read error: {}", e);
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::wire::METHOD_LOG;

    fn test_client() -> (
        Arc<RealtimeClient>,
        mpsc::UnboundedReceiver<ChannelMessage>,
        mpsc::UnboundedReceiver<Envelope>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (envelope_tx, envelope_rx) = mpsc::unbounded_channel();
        let client = Arc::new(RealtimeClient {
            url: "ws://127.0.0.1:0/websocket".into(),
            outbound: outbound_tx,
            envelopes: envelope_tx,
            pending: Mutex::new(HashMap::new()),
            seen_events: Mutex::new(HashSet::new()),
            state: Mutex::new(ConnectionState::Connected),
            last_connected_at: Mutex::new(None),
            pings_sent: AtomicU64::new(0),
        });
        (client, outbound_rx, envelope_rx)
    }

    fn ipc_event(event_id: &str, envelope_id: &str) -> ChannelMessage {
        ChannelMessage::Event {
            feed: IPC_FEED.into(),
            id: event_id.into(),
            payload: serde_json::json!({
                "id": envelope_id,
                "method": "server.get_config",
                "params": [],
            }),
        }
    }

    #[tokio::test]
    async fn test_feed_event_forwards_envelope_then_acks() {
        let (client, mut outbound, mut envelopes) = test_client();
        client.ingest(ipc_event("e1", "m1"));

        // Handoff happens first; the ack is only queued once the envelope
        // has been accepted.
        let envelope = envelopes.try_recv().expect("envelope not forwarded");
        assert_eq!(envelope.id, "m1");

        match outbound.recv().await.unwrap() {
            ChannelMessage::Method { method, params, .. } => {
                assert_eq!(method, METHOD_IPC_RECEIVED);
                assert_eq!(params[0], "e1");
            }
            other => panic!("expected ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_feed_event_not_acked() {
        let (client, mut outbound, mut envelopes) = test_client();
        client.ingest(ChannelMessage::Event {
            feed: IPC_FEED.into(),
            id: "e-bad".into(),
            payload: serde_json::json!({"garbage": true}),
        });

        // Nothing forwarded, nothing acknowledged.
        assert!(envelopes.try_recv().is_err());
        assert!(outbound.try_recv().is_err());

        // The event is still marked handled locally: a retransmission of the
        // same id is dropped instead of being retried.
        client.ingest(ChannelMessage::Event {
            feed: IPC_FEED.into(),
            id: "e-bad".into(),
            payload: serde_json::json!({"garbage": true}),
        });
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_feed_event_dropped() {
        let (client, mut outbound, mut envelopes) = test_client();
        client.ingest(ipc_event("e1", "m1"));
        client.ingest(ipc_event("e1", "m1"));

        assert!(envelopes.recv().await.is_some());
        assert!(envelopes.try_recv().is_err());

        // One ack only.
        assert!(outbound.recv().await.is_some());
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_other_feeds_ignored() {
        let (client, _outbound, mut envelopes) = test_client();
        client.ingest(ChannelMessage::Event {
            feed: "presence".into(),
            id: "e9".into(),
            payload: serde_json::json!({}),
        });
        assert!(envelopes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_call_resolves_on_matching_result() {
        let (client, mut outbound, _envelopes) = test_client();

        let caller = {
            let client = client.clone();
            tokio::spawn(async move { client.call(METHOD_LOG, vec![]).await })
        };

        let id = match outbound.recv().await.unwrap() {
            ChannelMessage::Method { id, .. } => id,
            other => panic!("expected method, got {:?}", other),
        };
        client.ingest(ChannelMessage::Result {
            id,
            result: Some(serde_json::json!("ok")),
            error: None,
        });

        assert_eq!(caller.await.unwrap().unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_call_fails_fast_when_disconnected() {
        let (client, _outbound, _envelopes) = test_client();
        client.set_state(ConnectionState::Disconnected);
        let err = client.call(METHOD_LOG, vec![]).await.unwrap_err();
        assert!(matches!(err, HearthError::ChannelCall(_)));
    }

    #[tokio::test]
    async fn test_disconnect_drains_pending_calls() {
        let (client, mut outbound, _envelopes) = test_client();

        let caller = {
            let client = client.clone();
            tokio::spawn(async move { client.call(METHOD_LOG, vec![]).await })
        };
        // Wait for the call to register before draining.
        outbound.recv().await.unwrap();

        client.drain_pending();
        assert!(caller.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_server_ping_answered_with_pong() {
        let (client, mut outbound, _envelopes) = test_client();
        client.ingest(ChannelMessage::Ping);
        assert!(matches!(
            outbound.recv().await.unwrap(),
            ChannelMessage::Pong
        ));
    }
}
