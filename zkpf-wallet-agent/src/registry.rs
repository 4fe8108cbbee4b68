//! Live connections keyed by client id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::error::AgentError;
use crate::types::ClientId;

struct ConnectionHandle {
    generation: u64,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the task and shutdown token of every running [`Connection`].
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ClientId, ConnectionHandle>>,
    generations: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start serving `connection`. Fails if its client id is already live.
    pub async fn spawn(self: &Arc<Self>, connection: Connection) -> Result<(), AgentError> {
        let client_id = connection.client_id().clone();
        let mut connections = self.connections.lock().await;
        if connections.contains_key(&client_id) {
            return Err(AgentError::DuplicateClient(client_id.to_string()));
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let shutdown = CancellationToken::new();
        let registry: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            let client_id = client_id.clone();
            async move {
                connection.run(shutdown).await;
                if let Some(registry) = registry.upgrade() {
                    registry.forget(&client_id, generation).await;
                }
            }
        });

        connections.insert(
            client_id,
            ConnectionHandle {
                generation,
                shutdown,
                task,
            },
        );
        Ok(())
    }

    /// Stop a connection and wait for its task. In-flight requests are aborted.
    pub async fn disconnect(&self, client_id: &ClientId) -> Result<(), AgentError> {
        let handle = self
            .connections
            .lock()
            .await
            .remove(client_id)
            .ok_or_else(|| AgentError::UnknownClient(client_id.to_string()))?;

        stop(client_id, handle).await;
        Ok(())
    }

    pub async fn shutdown_all(&self) {
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        for (client_id, handle) in drained {
            stop(&client_id, handle).await;
        }
    }

    pub async fn contains(&self, client_id: &ClientId) -> bool {
        self.connections.lock().await.contains_key(client_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Remove an entry whose connection ended on its own.
    async fn forget(&self, client_id: &ClientId, generation: u64) {
        let mut connections = self.connections.lock().await;
        if connections
            .get(client_id)
            .is_some_and(|handle| handle.generation == generation)
        {
            connections.remove(client_id);
            tracing::debug!(client_id = %client_id, "connection ended by client");
        }
    }
}

async fn stop(client_id: &ClientId, handle: ConnectionHandle) {
    handle.shutdown.cancel();
    if let Err(error) = handle.task.await {
        if error.is_panic() {
            tracing::error!(client_id = %client_id, %error, "connection task panicked");
        }
    }
    tracing::info!(client_id = %client_id, "client disconnected");
}
