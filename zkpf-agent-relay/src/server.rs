//! WebSocket front end for the wallet agent.
//!
//! Page clients connect on any path except the UI path. Their handshake
//! `Origin` header becomes the caller origin of every query they send, and
//! each page socket gets its own agent connection. Approval-surface clients
//! connect on the UI path, receive every approval request, and answer with
//! `ACTION_RESPONSE` messages. Decisions are only accepted from UI sockets.
//!
//! # Messages
//!
//! Page → relay: `{"type":"QUERY","requestId":..,"query":..,"args":{..}}`
//!
//! Relay → page: `{"requestId":..,"code":200,"response":..,"error":{..}?}`
//!
//! Relay → UI: `{"type":"APPROVAL_REQUEST","requestId":..,"clientId":..,"domain":..,"action":..,"prompt":..}`
//!
//! UI → relay: `{"type":"ACTION_RESPONSE","clientId":..,"requestId":..,"data":{"decision":"approved","response":..}}`
//!
//! A request that needs a decision while no UI socket is connected is
//! reported back to the agent at once instead of waiting for the timeout.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use zkpf_wallet_agent::{
    AgentError, ApprovalRequest, ClientEndpoint, ClientId, Domain, InboundMessage, WalletAgent,
};

use crate::config::RelayConfig;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ═══════════════════════════════════════════════════════════════════════════════
// MESSAGES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
#[serde(tag = "type")]
enum UiOutbound<'a> {
    #[serde(rename = "APPROVAL_REQUEST")]
    ApprovalRequest(&'a ApprovalRequest),
}

// ═══════════════════════════════════════════════════════════════════════════════
// RELAY
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared state of one relay instance.
pub struct Relay {
    agent: WalletAgent,
    ui_path: String,
    /// Serialized approval requests fanned out to every UI socket.
    ui: broadcast::Sender<String>,
}

impl Relay {
    pub fn new(agent: WalletAgent, config: &RelayConfig) -> Arc<Self> {
        let (ui, _) = broadcast::channel(config.ui_channel_capacity);
        Arc::new(Self {
            agent,
            ui_path: config.ui_path.clone(),
            ui,
        })
    }

    pub fn agent(&self) -> &WalletAgent {
        &self.agent
    }

    /// Accept sockets until `shutdown` fires, then close every agent connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, ui_path = %self.ui_path, "relay listening");
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let relay = self.clone();
                        let shutdown = shutdown.child_token();
                        tokio::spawn(async move {
                            if let Err(error) = relay.handle_socket(stream, peer, shutdown).await {
                                tracing::warn!(%peer, %error, "socket closed with error");
                            }
                        });
                    }
                    Err(error) => tracing::warn!(%error, "accept failed"),
                },
            }
        }

        self.agent.shutdown().await;
        tracing::info!("relay stopped");
    }

    async fn handle_socket(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), RelayError> {
        let mut ui_rx: Option<broadcast::Receiver<String>> = None;
        let mut origin: Option<Domain> = None;
        let ws = accept_hdr_async(
            stream,
            |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                // Subscribed before the handshake response goes out, so a UI
                // client sees every request sent after it is connected.
                if request.uri().path() == self.ui_path {
                    ui_rx = Some(self.ui.subscribe());
                }
                origin = request
                    .headers()
                    .get("origin")
                    .and_then(|value| value.to_str().ok())
                    .filter(|value| !value.is_empty() && *value != "null")
                    .map(Domain::from);
                Ok(response)
            },
        )
        .await?;

        if let Some(ui_rx) = ui_rx {
            tracing::info!(%peer, "approval surface connected");
            self.serve_ui(ws, ui_rx, shutdown).await
        } else {
            let client_id = ClientId::new(Uuid::new_v4().to_string());
            tracing::info!(%peer, client_id = %client_id, origin = ?origin, "page client connected");

            let endpoint = self.agent.connect(client_id.clone(), origin).await?;
            let served = self.serve_page(ws, endpoint, shutdown).await;
            if let Err(error) = self.agent.disconnect(&client_id).await {
                tracing::debug!(client_id = %client_id, %error, "connection already gone");
            }
            served
        }
    }

    async fn serve_page(
        &self,
        ws: WebSocketStream<TcpStream>,
        mut endpoint: ClientEndpoint,
        shutdown: CancellationToken,
    ) -> Result<(), RelayError> {
        let (mut sink, mut stream) = ws.split();
        let client_id = endpoint.client_id.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<InboundMessage>(&text) {
                        Ok(InboundMessage::ActionResponse(echo)) => {
                            tracing::warn!(
                                client_id = %client_id,
                                request_id = %echo.request_id,
                                "decision from page socket ignored"
                            );
                        }
                        Ok(message) => endpoint.send(message).await?,
                        Err(error) => {
                            tracing::warn!(client_id = %client_id, %error, "unparseable page message");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return Err(error.into()),
                },
                envelope = endpoint.responses.recv() => match envelope {
                    Some(envelope) => {
                        let text = serde_json::to_string(&envelope)?;
                        sink.send(Message::Text(text)).await?;
                    }
                    None => break,
                },
                Some(request) = endpoint.approval_requests.recv() => {
                    let text = serde_json::to_string(&UiOutbound::ApprovalRequest(&request))?;
                    if self.ui.send(text).is_err() {
                        tracing::warn!(
                            request_id = %request.request_id,
                            action = %request.action,
                            "no approval surface connected"
                        );
                        self.agent.report_unavailable(request.client_id, request.request_id);
                    }
                }
            }
        }

        tracing::info!(client_id = %client_id, "page client disconnected");
        Ok(())
    }

    async fn serve_ui(
        &self,
        ws: WebSocketStream<TcpStream>,
        mut requests: broadcast::Receiver<String>,
        shutdown: CancellationToken,
    ) -> Result<(), RelayError> {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = requests.recv() => match request {
                    Ok(text) => sink.send(Message::Text(text)).await?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "approval surface lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<InboundMessage>(&text) {
                        Ok(InboundMessage::ActionResponse(echo)) => match echo.client_id {
                            Some(client_id) => {
                                let request_id = echo.request_id;
                                let listeners = self.agent.submit_decision(
                                    client_id.clone(),
                                    request_id.clone(),
                                    echo.data,
                                );
                                tracing::debug!(
                                    client_id = %client_id,
                                    request_id = %request_id,
                                    listeners,
                                    "decision received"
                                );
                            }
                            None => tracing::warn!(
                                request_id = %echo.request_id,
                                "decision without client id ignored"
                            ),
                        },
                        Ok(InboundMessage::Query(query)) => {
                            tracing::warn!(request_id = %query.request_id, "query from approval surface ignored");
                        }
                        Err(error) => tracing::warn!(%error, "unparseable approval message"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return Err(error.into()),
                },
            }
        }

        tracing::info!("approval surface disconnected");
        Ok(())
    }
}
