//! Tracking of in-flight requests for one connection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::types::{ClientId, Domain, RequestId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Authorizing,
    AwaitingApproval,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub client_id: ClientId,
    pub domain: Option<Domain>,
    pub created_at: DateTime<Utc>,
    pub state: RequestState,
}

impl PendingRequest {
    pub fn new(
        request_id: RequestId,
        client_id: ClientId,
        domain: Option<Domain>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            client_id,
            domain,
            created_at,
            state: RequestState::Received,
        }
    }
}

/// In-flight requests keyed by id. Resolution removes the entry, so each
/// request resolves at most once.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking. Returns `false` if the id is already in flight.
    pub async fn track(&self, request: PendingRequest) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.contains_key(&request.request_id) {
            return false;
        }
        inner.insert(request.request_id.clone(), request);
        true
    }

    /// Move a tracked request to `state`. Returns `false` if it is no longer tracked.
    pub async fn transition(&self, request_id: &RequestId, state: RequestState) -> bool {
        match self.inner.lock().await.get_mut(request_id) {
            Some(request) => {
                tracing::trace!(request_id = %request_id, from = ?request.state, to = ?state, "request state");
                request.state = state;
                true
            }
            None => false,
        }
    }

    /// Stop tracking. Only the first call for a given id returns the request.
    pub async fn resolve(&self, request_id: &RequestId) -> Option<PendingRequest> {
        self.inner.lock().await.remove(request_id)
    }

    pub async fn state(&self, request_id: &RequestId) -> Option<RequestState> {
        self.inner.lock().await.get(request_id).map(|r| r.state)
    }

    pub async fn contains(&self, request_id: &RequestId) -> bool {
        self.inner.lock().await.contains_key(request_id)
    }

    /// Drop every tracked request. Returns how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let dropped = inner.len();
        inner.clear();
        dropped
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
