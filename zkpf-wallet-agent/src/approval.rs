//! Human-in-the-loop decisions.
//!
//! Every decision is broadcast on one [`ApprovalChannel`]; a request waiting
//! for a decision holds an [`ApprovalSubscription`] that filters on its own
//! client and request id. Request ids are only unique per client, so both are
//! needed to address a request. Dropping the subscription releases the listener.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::types::{ClientId, Domain, RequestId};

/// The user's answer to an approval request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "response", rename_all = "lowercase")]
pub enum Decision {
    Approved(Value),
    Rejected(Value),
}

/// What a waiting request can hear back from the approval surface.
#[derive(Clone, Debug, PartialEq)]
pub enum ApprovalSignal {
    Decided(Decision),
    /// The request could not be shown to any approval surface.
    Unavailable,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApprovalEvent {
    pub client_id: ClientId,
    pub request_id: RequestId,
    pub signal: ApprovalSignal,
}

impl ApprovalEvent {
    pub fn decided(client_id: ClientId, request_id: RequestId, decision: Decision) -> Self {
        Self {
            client_id,
            request_id,
            signal: ApprovalSignal::Decided(decision),
        }
    }

    pub fn unavailable(client_id: ClientId, request_id: RequestId) -> Self {
        Self {
            client_id,
            request_id,
            signal: ApprovalSignal::Unavailable,
        }
    }
}

/// Sent to the approval surface when a request needs a human decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub request_id: RequestId,
    pub client_id: ClientId,
    pub domain: Domain,
    /// UI flow to open, e.g. `account.login` or `proof.approve`.
    pub action: String,
    pub prompt: Value,
}

/// Broadcast stream of decisions tagged with client and request ids.
#[derive(Clone, Debug)]
pub struct ApprovalChannel {
    tx: broadcast::Sender<ApprovalEvent>,
}

impl ApprovalChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast a decision. Returns how many listeners saw it.
    ///
    /// A decision nobody waits for (unknown or already resolved request) is
    /// dropped without error.
    pub fn publish(&self, event: ApprovalEvent) -> usize {
        let client_id = event.client_id.clone();
        let request_id = event.request_id.clone();
        match self.tx.send(event) {
            Ok(listeners) => {
                tracing::debug!(client_id = %client_id, request_id = %request_id, listeners, "decision published");
                listeners
            }
            Err(_) => {
                tracing::debug!(
                    client_id = %client_id,
                    request_id = %request_id,
                    "decision published with no listeners"
                );
                0
            }
        }
    }

    pub fn subscribe(&self, client_id: ClientId, request_id: RequestId) -> ApprovalSubscription {
        ApprovalSubscription {
            client_id,
            request_id,
            rx: self.tx.subscribe(),
        }
    }

    /// Live subscriptions across all requests.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A listener for the decision on one request.
#[derive(Debug)]
pub struct ApprovalSubscription {
    client_id: ClientId,
    request_id: RequestId,
    rx: broadcast::Receiver<ApprovalEvent>,
}

impl ApprovalSubscription {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    fn matches(&self, event: &ApprovalEvent) -> bool {
        event.client_id == self.client_id && event.request_id == self.request_id
    }

    /// Wait for the signal addressed to this request. Events for other
    /// requests, including same-numbered requests of other clients, are skipped.
    ///
    /// Never resolves if the channel closes; callers race it against a timeout.
    pub async fn signal(&mut self) -> ApprovalSignal {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.matches(&event) => return event.signal,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    // The signal for this request may have been skipped; it then times out.
                    tracing::error!(
                        client_id = %self.client_id,
                        request_id = %self.request_id,
                        skipped,
                        "approval subscriber lagged, decisions lost"
                    );
                }
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}
