//! The wallet agent: shared services plus the connection registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::approval::{ApprovalChannel, ApprovalEvent, Decision};
use crate::chain::Pipeline;
use crate::config::AgentConfig;
use crate::connection::{ClientEndpoint, Connection};
use crate::error::AgentError;
use crate::guard::Operation;
use crate::operations::OperationRegistry;
use crate::registry::ConnectionRegistry;
use crate::session::{Clock, SystemClock};
use crate::store::{MemoryTrustStore, TrustStore};
use crate::sync::SyncSignal;
use crate::types::{Address, ClientId, Domain, RequestId, Session};
use crate::validator::AuthEnv;
use crate::vault;

/// State shared by every connection of one agent.
pub(crate) struct AgentServices {
    pub(crate) operations: OperationRegistry,
    pub(crate) env: AuthEnv,
    pub(crate) approvals: ApprovalChannel,
    pub(crate) approval_timeout: Duration,
    pub(crate) inbound_capacity: usize,
    pub(crate) outbound_capacity: usize,
}

pub struct AgentBuilder {
    config: AgentConfig,
    store: Option<Arc<dyn TrustStore>>,
    clock: Option<Arc<dyn Clock>>,
    operations: Vec<(String, Pipeline, Arc<dyn Operation>)>,
}

impl AgentBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            operations: Vec::new(),
        }
    }

    /// Trust store collaborator. Defaults to an empty [`MemoryTrustStore`].
    pub fn store(mut self, store: Arc<dyn TrustStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Expose `operation` as query `name` behind `pipeline`, replacing a built-in of the same name.
    pub fn operation(
        mut self,
        name: impl Into<String>,
        pipeline: Pipeline,
        operation: Arc<dyn Operation>,
    ) -> Self {
        self.operations.push((name.into(), pipeline, operation));
        self
    }

    /// Build the agent. The returned receiver yields addresses whose
    /// accounts asked for a background resync.
    pub fn build(self) -> Result<(WalletAgent, mpsc::Receiver<Address>), AgentError> {
        self.config.validate()?;

        let store: Arc<dyn TrustStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryTrustStore::new()),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let sessions = self.config.session_policy();
        let (sync, sync_rx) = SyncSignal::channel(self.config.sync_queue_capacity);

        let mut operations = OperationRegistry::with_builtins(store.clone(), sessions);
        for (name, pipeline, operation) in self.operations {
            operations.register(&name, pipeline, operation);
        }

        let services = AgentServices {
            operations,
            env: AuthEnv {
                store,
                clock,
                sessions,
                sync,
            },
            approvals: ApprovalChannel::new(self.config.approval_channel_capacity),
            approval_timeout: self.config.approval_timeout(),
            inbound_capacity: self.config.inbound_capacity,
            outbound_capacity: self.config.outbound_capacity,
        };

        tracing::debug!(
            queries = ?services.operations.names(),
            approval_timeout_secs = self.config.approval_timeout_secs,
            "wallet agent built"
        );

        let agent = WalletAgent {
            services: Arc::new(services),
            connections: ConnectionRegistry::new(),
            config: self.config,
        };
        Ok((agent, sync_rx))
    }
}

/// Handle to a running agent. Cheap to clone.
#[derive(Clone)]
pub struct WalletAgent {
    services: Arc<AgentServices>,
    connections: Arc<ConnectionRegistry>,
    config: AgentConfig,
}

impl WalletAgent {
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TrustStore> {
        &self.services.env.store
    }

    pub fn approvals(&self) -> &ApprovalChannel {
        &self.services.approvals
    }

    /// Open a connection for `client_id`. `origin` is the caller origin
    /// attached to every request of this client.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect(
        &self,
        client_id: ClientId,
        origin: Option<Domain>,
    ) -> Result<ClientEndpoint, AgentError> {
        let (connection, endpoint) = Connection::open(client_id, origin, self.services.clone());
        self.connections.spawn(connection).await?;
        Ok(endpoint)
    }

    pub async fn disconnect(&self, client_id: &ClientId) -> Result<(), AgentError> {
        self.connections.disconnect(client_id).await
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.len().await
    }

    /// Deliver a decision from the approval surface for request `request_id`
    /// of client `client_id`. Returns the number of listeners that saw it;
    /// zero when no request is waiting at all.
    pub fn submit_decision(
        &self,
        client_id: ClientId,
        request_id: RequestId,
        decision: Decision,
    ) -> usize {
        self.services
            .approvals
            .publish(ApprovalEvent::decided(client_id, request_id, decision))
    }

    /// Tell a waiting request that its approval request reached no approval
    /// surface. It then resolves as if none were attached.
    pub fn report_unavailable(&self, client_id: ClientId, request_id: RequestId) -> usize {
        self.services
            .approvals
            .publish(ApprovalEvent::unavailable(client_id, request_id))
    }

    /// Open the key vault with `password` and start a session for `address`.
    pub async fn unlock(&self, address: &Address, password: &str) -> Result<Session, AgentError> {
        let env = &self.services.env;
        Ok(vault::unlock(env.store.as_ref(), env.clock.as_ref(), address, password).await?)
    }

    pub async fn logout(&self, address: &Address) -> Result<(), AgentError> {
        Ok(vault::logout(self.services.env.store.as_ref(), address).await?)
    }

    pub async fn shutdown(&self) {
        self.connections.shutdown_all().await;
    }
}
