//! Per-client request handling.
//!
//! A [`Connection`] owns a client's inbound channel and turns every inbound
//! query into exactly one [`ResponseEnvelope`]:
//!
//! ```text
//! Received ─► Authorizing ─► Denied ──────────────────────────────► Resolved
//!                         └► Authorized ─► (AwaitingApproval)? ───► Resolved
//! ```
//!
//! Each query runs on its own task so a request waiting for a human decision
//! never blocks the others. The pending-request table is the only place a
//! request can be resolved, and resolution removes the entry, so a second
//! envelope for the same id cannot be produced.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentServices;
use crate::approval::{ApprovalEvent, ApprovalRequest, ApprovalSignal, Decision};
use crate::error::{AgentError, ArgumentError, Failure};
use crate::guard::Outcome;
use crate::pending::{PendingRequest, PendingRequests, RequestState};
use crate::protocol::{InboundMessage, QueryRequest, Resolution, ResponseEnvelope};
use crate::request::{GuardedRequest, RequestArgs};
use crate::types::{ClientId, Domain, RequestId};

/// Client-side handles of a connection.
#[derive(Debug)]
pub struct ClientEndpoint {
    pub client_id: ClientId,
    /// Queries and decision echoes from the page.
    pub inbound: mpsc::Sender<InboundMessage>,
    /// One envelope per query.
    pub responses: mpsc::Receiver<ResponseEnvelope>,
    /// Requests that need the approval surface.
    pub approval_requests: mpsc::Receiver<ApprovalRequest>,
}

impl ClientEndpoint {
    pub async fn send(&self, message: InboundMessage) -> Result<(), AgentError> {
        self.inbound
            .send(message)
            .await
            .map_err(|_| AgentError::ChannelClosed("inbound"))
    }

    pub async fn next_response(&mut self) -> Option<ResponseEnvelope> {
        self.responses.recv().await
    }

    pub async fn next_approval_request(&mut self) -> Option<ApprovalRequest> {
        self.approval_requests.recv().await
    }
}

pub struct Connection {
    inbound: mpsc::Receiver<InboundMessage>,
    worker: RequestWorker,
}

impl Connection {
    pub(crate) fn open(
        client_id: ClientId,
        origin: Option<Domain>,
        services: Arc<AgentServices>,
    ) -> (Self, ClientEndpoint) {
        let (inbound_tx, inbound_rx) = mpsc::channel(services.inbound_capacity);
        let (response_tx, response_rx) = mpsc::channel(services.outbound_capacity);
        let (approval_tx, approval_rx) = mpsc::channel(services.outbound_capacity);

        let connection = Self {
            inbound: inbound_rx,
            worker: RequestWorker {
                client_id: client_id.clone(),
                origin,
                services,
                pending: Arc::new(PendingRequests::new()),
                responses: response_tx,
                approval_requests: approval_tx,
            },
        };
        let endpoint = ClientEndpoint {
            client_id,
            inbound: inbound_tx,
            responses: response_rx,
            approval_requests: approval_rx,
        };
        (connection, endpoint)
    }

    pub fn client_id(&self) -> &ClientId {
        &self.worker.client_id
    }

    pub fn pending(&self) -> Arc<PendingRequests> {
        self.worker.pending.clone()
    }

    /// Serve until the client hangs up or `shutdown` fires.
    ///
    /// On hang-up, in-flight requests still run to completion; on shutdown
    /// they are aborted. Tracking is cleared either way.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let client_id = self.worker.client_id.clone();
        tracing::info!(client_id = %client_id, origin = ?self.worker.origin, "connection opened");

        let mut in_flight = JoinSet::new();
        let cancelled = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break true,
                message = self.inbound.recv() => match message {
                    Some(message) => self.dispatch(message, &mut in_flight).await,
                    None => break false,
                },
                Some(joined) = in_flight.join_next() => log_join(&client_id, joined),
            }
        };

        if cancelled {
            in_flight.abort_all();
        } else {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        in_flight.abort_all();
                        break;
                    }
                    joined = in_flight.join_next() => match joined {
                        Some(joined) => log_join(&client_id, joined),
                        None => break,
                    },
                }
            }
        }
        while in_flight.join_next().await.is_some() {}

        let dropped = self.worker.pending.clear().await;
        tracing::info!(client_id = %client_id, cancelled, dropped, "connection closed");
    }

    async fn dispatch(&self, message: InboundMessage, in_flight: &mut JoinSet<()>) {
        let worker = &self.worker;
        match message {
            InboundMessage::ActionResponse(echo) => {
                let local = worker.pending.contains(&echo.request_id).await;
                tracing::debug!(
                    client_id = %worker.client_id,
                    claimed = ?echo.client_id,
                    request_id = %echo.request_id,
                    local,
                    "decision echoed by client"
                );
                // An echo can only decide this client's own requests.
                worker.services.approvals.publish(ApprovalEvent::decided(
                    worker.client_id.clone(),
                    echo.request_id,
                    echo.data,
                ));
            }
            InboundMessage::Query(query) => {
                if let Some(claimed) = &query.client_id {
                    if claimed != &worker.client_id {
                        tracing::debug!(client_id = %worker.client_id, %claimed, "ignoring claimed client id");
                    }
                }

                let tracked = PendingRequest::new(
                    query.request_id.clone(),
                    worker.client_id.clone(),
                    worker.origin.clone(),
                    worker.services.env.clock.now(),
                );
                if !worker.pending.track(tracked).await {
                    tracing::warn!(
                        client_id = %worker.client_id,
                        request_id = %query.request_id,
                        "duplicate request id while in flight, dropping"
                    );
                    return;
                }

                let worker = worker.clone();
                in_flight.spawn(async move { worker.handle(query).await });
            }
        }
    }
}

fn log_join(client_id: &ClientId, joined: Result<(), tokio::task::JoinError>) {
    if let Err(error) = joined {
        if error.is_panic() {
            tracing::error!(client_id = %client_id, %error, "request task panicked");
        }
    }
}

/// Everything one request task needs.
#[derive(Clone)]
struct RequestWorker {
    client_id: ClientId,
    origin: Option<Domain>,
    services: Arc<AgentServices>,
    pending: Arc<PendingRequests>,
    responses: mpsc::Sender<ResponseEnvelope>,
    approval_requests: mpsc::Sender<ApprovalRequest>,
}

impl RequestWorker {
    async fn handle(self, query: QueryRequest) {
        let request_id = query.request_id.clone();
        let resolution = self.process(query).await;
        self.resolve(&request_id, resolution).await;
    }

    async fn process(&self, query: QueryRequest) -> Resolution {
        let Some(domain) = self.origin.clone() else {
            return Resolution::Denied(ArgumentError::MissingOrigin.into());
        };
        if let Some(claimed) = &query.domain {
            if claimed != &domain {
                tracing::debug!(request_id = %query.request_id, %claimed, origin = %domain, "ignoring claimed domain");
            }
        }

        let guarded = match self.services.operations.get(&query.query) {
            Ok(guarded) => guarded,
            Err(error) => return Resolution::Denied(error.into()),
        };

        self.pending
            .transition(&query.request_id, RequestState::Authorizing)
            .await;
        let request = GuardedRequest::new(domain, RequestArgs::new(query.args));

        match guarded.call(&request, &self.services.env).await {
            Ok(Outcome::Complete(payload)) => Resolution::Completed(payload),
            Ok(Outcome::NeedsApproval { action, prompt }) => self
                .await_decision(&query.request_id, &request.domain, action, prompt)
                .await
                .unwrap_or_else(|| Resolution::Denied(Failure::unknown("approval surface unavailable"))),
            Err(failure) => {
                let reauth = failure
                    .permission_kind()
                    .and_then(|kind| kind.reauth_action().map(|action| (kind, action)));
                let Some((kind, action)) = reauth else {
                    return Resolution::Denied(failure);
                };

                let prompt = json!({
                    "query": query.query,
                    "key": kind.key(),
                    "message": kind.to_string(),
                });
                self.await_decision(&query.request_id, &request.domain, action.to_string(), prompt)
                    .await
                    .unwrap_or(Resolution::Denied(failure))
            }
        }
    }

    /// Ask the approval surface and race its decision against the timeout.
    ///
    /// Returns `None` when no approval surface can take the request, including
    /// when the host reports it unreachable after the hand-off.
    async fn await_decision(
        &self,
        request_id: &RequestId,
        domain: &Domain,
        action: String,
        prompt: Value,
    ) -> Option<Resolution> {
        // Subscribe first so an immediate decision cannot be missed.
        let mut subscription = self
            .services
            .approvals
            .subscribe(self.client_id.clone(), request_id.clone());

        let request = ApprovalRequest {
            request_id: request_id.clone(),
            client_id: self.client_id.clone(),
            domain: domain.clone(),
            action,
            prompt,
        };
        if let Err(error) = self.approval_requests.try_send(request) {
            match error {
                TrySendError::Full(request) => tracing::warn!(
                    request_id = %request_id,
                    action = %request.action,
                    "approval queue full"
                ),
                TrySendError::Closed(request) => tracing::debug!(
                    request_id = %request_id,
                    action = %request.action,
                    "no approval surface attached"
                ),
            }
            return None;
        }

        self.pending
            .transition(request_id, RequestState::AwaitingApproval)
            .await;

        let resolution = tokio::select! {
            biased;
            signal = subscription.signal() => match signal {
                ApprovalSignal::Decided(Decision::Approved(payload)) => Some(Resolution::Completed(payload)),
                ApprovalSignal::Decided(Decision::Rejected(payload)) => Some(Resolution::Rejected(payload)),
                ApprovalSignal::Unavailable => {
                    tracing::debug!(request_id = %request_id, "approval request reached no surface");
                    None
                }
            },
            _ = tokio::time::sleep(self.services.approval_timeout) => {
                tracing::info!(request_id = %request_id, "approval window elapsed");
                Some(Resolution::TimedOut)
            }
        };
        drop(subscription);

        resolution
    }

    async fn resolve(&self, request_id: &RequestId, resolution: Resolution) {
        if self.pending.resolve(request_id).await.is_none() {
            tracing::warn!(request_id = %request_id, "request already resolved, dropping envelope");
            return;
        }

        let envelope = ResponseEnvelope::from_resolution(request_id.clone(), resolution);
        tracing::info!(
            client_id = %self.client_id,
            request_id = %request_id,
            code = envelope.code.as_u16(),
            "request resolved"
        );

        if self.responses.send(envelope).await.is_err() {
            tracing::debug!(request_id = %request_id, "client gone before response");
        }
    }
}
