//! zkpf-wallet-agent: trust and request mediation for the zkpf wallet agent.
//!
//! Untrusted callers (web origins, proxied by a page-side relay) send
//! queries to the agent. Each query is checked by an ordered validator
//! chain before it reaches a privileged business operation, and every
//! query receives exactly one response, even when the operation has to
//! wait for a human decision on a separate approval surface.
//!
//! # Authorization
//!
//! Five checks are composed into four pipelines:
//!
//! | Pipeline   | Checks |
//! |------------|--------|
//! | `keyvault` | extension-initialized, session-valid |
//! | `account`  | keyvault + account-linked |
//! | `domain`   | account + domain-approved |
//! | `entity`   | account + entity-domain-access |
//!
//! The first failing check stops the chain. Each check returns a context
//! fragment that is folded into a fresh [`TrustContext`].
//!
//! # Responses
//!
//! | Code | Meaning |
//! |------|---------|
//! | 200  | success |
//! | 401  | needs re-authorization |
//! | 403  | rejected by the user |
//! | 408  | no decision before the approval window closed |
//! | 500  | anything else |
//!
//! # Example
//!
//! ```no_run
//! use zkpf_wallet_agent::{AgentConfig, ClientId, Domain, WalletAgent};
//!
//! # async fn run() -> Result<(), zkpf_wallet_agent::AgentError> {
//! let (agent, _resync) = WalletAgent::builder(AgentConfig::default()).build()?;
//! let mut client = agent
//!     .connect(ClientId::from("tab-1"), Some(Domain::from("https://shop.example")))
//!     .await?;
//! # let _ = client.next_response().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod approval;
pub mod chain;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod guard;
pub mod operations;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod request;
pub mod session;
pub mod store;
pub mod sync;
pub mod types;
pub mod validator;
pub mod vault;

pub use agent::{AgentBuilder, WalletAgent};
pub use approval::{
    ApprovalChannel, ApprovalEvent, ApprovalRequest, ApprovalSignal, ApprovalSubscription, Decision,
};
pub use chain::{Pipeline, ValidatorChain};
pub use config::{AgentConfig, SessionConfig};
pub use connection::{ClientEndpoint, Connection};
pub use context::{ContextFragment, KeyMaterial, TrustContext};
pub use error::{AgentError, ArgumentError, Failure, OperationError, PermissionKind};
pub use guard::{Guarded, Operation, Outcome};
pub use operations::OperationRegistry;
pub use pending::{PendingRequest, PendingRequests, RequestState};
pub use protocol::{
    DecisionEcho, ErrorDescriptor, InboundMessage, QueryRequest, Resolution, ResponseCode,
    ResponseEnvelope,
};
pub use registry::ConnectionRegistry;
pub use request::{GuardedRequest, RequestArgs};
pub use session::{Clock, FixedClock, SessionPolicy, SessionState, SystemClock};
pub use store::{MemoryTrustStore, StoreError, TrustStore};
pub use sync::SyncSignal;
pub use types::{
    Address, AssetId, ClientId, Domain, DomainApproval, EntityId, RegisteredUser, RequestId,
    Session,
};
pub use validator::{AuthEnv, Check, Rejection, Validator};
pub use vault::{CredentialHandle, SealedKeyStore, UnlockedKeyStore, VaultError};
