//! Loopback HTTP transport.
//!
//! Serves `POST /ipc` on a loopback address for hosts that cannot hold the
//! worker's pipes (a rebuilt host process attaching to an already running
//! worker). HTTP cannot push, so replies are POSTed to a callback URL the
//! host provides at spawn time.
//!
//! Liveness is contact-based: the transport counts as active after its first
//! inbound request or successful reply delivery, and goes inactive when a
//! reply POST fails.

use crate::error::{HearthError, Result};
use crate::ipc::envelope::{Envelope, Reply};
use crate::ipc::transport::Transport;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct HttpTransport {
    listen_addr: SocketAddr,
    reply_url: String,
    http: reqwest::Client,
    active: Arc<AtomicBool>,
}

#[derive(Clone)]
struct IngressState {
    incoming: mpsc::UnboundedSender<Envelope>,
    active: Arc<AtomicBool>,
}

impl HttpTransport {
    pub fn new(listen_addr: SocketAddr, reply_url: String) -> Self {
        Self {
            listen_addr,
            reply_url,
            http: reqwest::Client::new(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn listen(&self, incoming: mpsc::UnboundedSender<Envelope>) -> Result<()> {
        let state = IngressState {
            incoming,
            active: self.active.clone(),
        };
        let router = Router::new()
            .route("/ipc", post(receive_envelope))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| {
                HearthError::Transport(format!("http bind {} failed: {}", self.listen_addr, e))
            })?;
        tracing::info!("ipc http transport listening on {}", self.listen_addr);

        axum::serve(listener, router)
            .await
            .map_err(|e| HearthError::Transport(format!("http serve failed: {}", e)))
    }

    async fn reply(&self, reply: &Reply) -> Result<()> {
        let result = self.http.post(&self.reply_url).json(reply).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                self.active.store(true, Ordering::SeqCst);
                Ok(())
            }
            Ok(response) => {
                self.active.store(false, Ordering::SeqCst);
                Err(HearthError::Transport(format!(
                    "reply callback returned {}",
                    response.status()
                )))
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                Err(HearthError::Transport(format!(
                    "reply callback unreachable: {}",
                    e
                )))
            }
        }
    }
}

async fn receive_envelope(
    State(state): State<IngressState>,
    Json(envelope): Json<Envelope>,
) -> StatusCode {
    state.active.store(true, Ordering::SeqCst);
    if state.incoming.send(envelope).is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::envelope::{MethodCall, METHOD_SERVER_GET_CONFIG};

    fn loopback_transport(reply_url: &str) -> HttpTransport {
        HttpTransport::new("127.0.0.1:0".parse().unwrap(), reply_url.to_string())
    }

    /// Callback endpoint that answers every reply POST with a fixed status.
    async fn stub_callback(status: StatusCode) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().route("/reply", post(move || async move { status }));
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/reply", addr)
    }

    #[tokio::test]
    async fn test_inbound_request_marks_transport_active() {
        let transport = loopback_transport("http://127.0.0.1:1/reply");
        assert!(!transport.is_active());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = IngressState {
            incoming: tx,
            active: transport.active.clone(),
        };
        let envelope = Envelope::from_call(&MethodCall::GetServerConfig);
        let status = receive_envelope(State(state), Json(envelope)).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(transport.is_active());
        assert_eq!(rx.try_recv().unwrap().method, METHOD_SERVER_GET_CONFIG);
    }

    #[tokio::test]
    async fn test_inbound_request_with_closed_sink_is_unavailable() {
        let transport = loopback_transport("http://127.0.0.1:1/reply");
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let state = IngressState {
            incoming: tx,
            active: transport.active.clone(),
        };
        let envelope = Envelope::from_call(&MethodCall::GetServerConfig);
        let status = receive_envelope(State(state), Json(envelope)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_successful_reply_marks_transport_active() {
        let url = stub_callback(StatusCode::OK).await;
        let transport = loopback_transport(&url);
        assert!(!transport.is_active());

        transport.reply(&Reply::RefreshNeeded).await.unwrap();
        assert!(transport.is_active());
    }

    #[tokio::test]
    async fn test_rejected_reply_marks_transport_inactive() {
        let url = stub_callback(StatusCode::INTERNAL_SERVER_ERROR).await;
        let transport = loopback_transport(&url);
        transport.active.store(true, Ordering::SeqCst);

        assert!(transport.reply(&Reply::RefreshNeeded).await.is_err());
        assert!(!transport.is_active());
    }

    #[tokio::test]
    async fn test_unreachable_callback_marks_transport_inactive() {
        // Port 1 is reserved and nothing listens there.
        let transport = loopback_transport("http://127.0.0.1:1/reply");
        transport.active.store(true, Ordering::SeqCst);

        assert!(transport.reply(&Reply::RefreshNeeded).await.is_err());
        assert!(!transport.is_active());
    }
}
