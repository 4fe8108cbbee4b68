//! Error types for the wallet agent.

use std::any::Any;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

// ═══════════════════════════════════════════════════════════════════════════════
// AGENT ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors raised while configuring or operating the agent itself.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("client already connected: {0}")]
    DuplicateClient(String),

    #[error("client not connected: {0}")]
    UnknownClient(String),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Vault(#[from] crate::vault::VaultError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(err: config::ConfigError) -> Self {
        AgentError::InvalidConfig(err.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PERMISSION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Expected, user-recoverable authorization failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionKind {
    #[error("the wallet extension has not been set up")]
    ExtensionNotRegistered,

    #[error("the account is not logged in")]
    AccountNotLoggedIn,

    #[error("the stored credential does not open the key vault")]
    AccountIncorrectPassword,

    #[error("the account is not linked to this wallet")]
    AccountNotLinked,

    #[error("this site has not been approved for the requested asset")]
    DomainNotRegistered,

    #[error("this site has not been granted access to the requested note")]
    DomainNotGrantedAccess,
}

impl PermissionKind {
    /// Wire key, e.g. `account-not-logged-in`.
    pub fn key(self) -> &'static str {
        match self {
            Self::ExtensionNotRegistered => "extension-not-registered",
            Self::AccountNotLoggedIn => "account-not-logged-in",
            Self::AccountIncorrectPassword => "account-incorrect-password",
            Self::AccountNotLinked => "account-not-linked",
            Self::DomainNotRegistered => "domain-not-registered",
            Self::DomainNotGrantedAccess => "domain-not-granted-access",
        }
    }

    /// UI flow that can repair this failure, if any.
    ///
    /// Kinds with an action resolve as "needs re-authorization" (401);
    /// kinds without one are returned to the caller as a plain error.
    pub fn reauth_action(self) -> Option<&'static str> {
        match self {
            Self::ExtensionNotRegistered => Some("extension.register"),
            Self::AccountNotLoggedIn => Some("account.login"),
            Self::AccountNotLinked => Some("account.link"),
            Self::DomainNotRegistered => Some("domain.approve"),
            Self::DomainNotGrantedAccess => Some("domain.grantAccess"),
            Self::AccountIncorrectPassword => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARGUMENT ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Malformed or missing request fields, detected before any validator runs.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("missing required argument `{0}`")]
    Missing(String),

    #[error("argument `{field}` is malformed: {reason}")]
    Malformed { field: String, reason: String },

    #[error("unknown query `{0}`")]
    UnknownQuery(String),

    #[error("request carries no caller origin")]
    MissingOrigin,
}

impl ArgumentError {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Missing(_) => "missing-argument",
            Self::Malformed { .. } => "malformed-argument",
            Self::UnknownQuery(_) => "unknown-query",
            Self::MissingOrigin => "missing-origin",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GUARDED CALL FAILURES
// ═══════════════════════════════════════════════════════════════════════════════

/// The only failure shape a caller of a guarded operation ever observes.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("permission denied: {0}")]
    Permission(PermissionKind),

    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error("unknown failure: {message}")]
    Unknown { message: String },
}

impl Failure {
    pub fn unknown(message: impl Into<String>) -> Self {
        Failure::Unknown {
            message: message.into(),
        }
    }

    /// Normalize a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Failure::unknown(message)
    }

    pub fn permission_kind(&self) -> Option<PermissionKind> {
        match self {
            Failure::Permission(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl From<PermissionKind> for Failure {
    fn from(kind: PermissionKind) -> Self {
        Failure::Permission(kind)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUSINESS OPERATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors returned by a terminal business operation.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("operation failed: {0}")]
    Failed(String),

    #[error("operation requires context that the pipeline did not provide: {0}")]
    MissingContext(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for OperationError {
    fn from(err: serde_json::Error) -> Self {
        OperationError::Serialization(err.to_string())
    }
}
