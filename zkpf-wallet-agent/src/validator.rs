//! Authorization checks.
//!
//! A [`Validator`] inspects the request and the context built so far and
//! either contributes a [`ContextFragment`] or rejects the request. The five
//! canonical checks are the variants of [`Check`], dispatched statically.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::{ContextFragment, KeyMaterial, TrustContext};
use crate::error::PermissionKind;
use crate::request::{GuardedRequest, ARG_ADDRESS, ARG_ASSET_ID, ARG_NOTE_ID};
use crate::session::{Clock, SessionPolicy};
use crate::store::{StoreError, TrustStore};
use crate::sync::SyncSignal;
use crate::vault::VaultError;

/// Why a validator refused to contribute.
#[derive(Debug, Error)]
pub enum Rejection {
    /// Expected failure the user can repair.
    #[error("permission denied: {0}")]
    Permission(PermissionKind),

    /// Anything unexpected; normalized to an unknown failure by the chain.
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl From<PermissionKind> for Rejection {
    fn from(kind: PermissionKind) -> Self {
        Rejection::Permission(kind)
    }
}

impl From<StoreError> for Rejection {
    fn from(err: StoreError) -> Self {
        Rejection::Fault(err.into())
    }
}

/// Collaborators every validator may consult.
#[derive(Clone)]
pub struct AuthEnv {
    pub store: Arc<dyn TrustStore>,
    pub clock: Arc<dyn Clock>,
    pub sessions: SessionPolicy,
    pub sync: SyncSignal,
}

/// A single named authorization check.
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Request arguments this check reads.
    fn required_args(&self) -> &'static [&'static str] {
        &[]
    }

    async fn validate(
        &self,
        request: &GuardedRequest,
        context: &TrustContext,
        env: &AuthEnv,
    ) -> Result<ContextFragment, Rejection>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// CANONICAL CHECKS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Check {
    /// Key material has been installed.
    ExtensionInitialized,
    /// A live session exists for the caller-supplied address.
    SessionValid,
    /// The address is linked locally and the session credential opens the vault.
    AccountLinked,
    /// The caller origin is approved for the requested asset.
    DomainApproved,
    /// The caller origin is approved for the asset of the requested note.
    EntityDomainAccess,
}

#[async_trait]
impl Validator for Check {
    fn name(&self) -> &'static str {
        match self {
            Check::ExtensionInitialized => "extension-initialized",
            Check::SessionValid => "session-valid",
            Check::AccountLinked => "account-linked",
            Check::DomainApproved => "domain-approved",
            Check::EntityDomainAccess => "entity-domain-access",
        }
    }

    fn required_args(&self) -> &'static [&'static str] {
        match self {
            Check::ExtensionInitialized => &[],
            Check::SessionValid | Check::AccountLinked => &[ARG_ADDRESS],
            Check::DomainApproved => &[ARG_ASSET_ID],
            Check::EntityDomainAccess => &[ARG_NOTE_ID],
        }
    }

    async fn validate(
        &self,
        request: &GuardedRequest,
        context: &TrustContext,
        env: &AuthEnv,
    ) -> Result<ContextFragment, Rejection> {
        match self {
            Check::ExtensionInitialized => extension_initialized(env).await,
            Check::SessionValid => session_valid(request, env).await,
            Check::AccountLinked => account_linked(request, context, env).await,
            Check::DomainApproved => domain_approved(request, env).await,
            Check::EntityDomainAccess => entity_domain_access(request, env).await,
        }
    }
}

async fn extension_initialized(env: &AuthEnv) -> Result<ContextFragment, Rejection> {
    let sealed = env
        .store
        .key_material()
        .await?
        .ok_or(PermissionKind::ExtensionNotRegistered)?;

    Ok(ContextFragment::empty().with_key_store(KeyMaterial::Sealed(Arc::new(sealed))))
}

async fn session_valid(
    request: &GuardedRequest,
    env: &AuthEnv,
) -> Result<ContextFragment, Rejection> {
    let address = request.args.address().map_err(anyhow::Error::from)?;
    let session = env
        .store
        .get_session(&address)
        .await?
        .ok_or(PermissionKind::AccountNotLoggedIn)?;

    let state = env.sessions.assess(&session, env.clock.now());
    if !state.is_valid() {
        env.store.evict_session(&address).await?;
        tracing::info!(address = %address, ?state, "stale session evicted");
        return Err(PermissionKind::AccountNotLoggedIn.into());
    }

    Ok(ContextFragment::empty().with_session(session))
}

async fn account_linked(
    request: &GuardedRequest,
    context: &TrustContext,
    env: &AuthEnv,
) -> Result<ContextFragment, Rejection> {
    let address = request.args.address().map_err(anyhow::Error::from)?;
    let user = env
        .store
        .get_registered_user(&address)
        .await?
        .ok_or(PermissionKind::AccountNotLinked)?;

    let session = context
        .session()
        .ok_or_else(|| anyhow::anyhow!("account check ran before a session was established"))?;
    let sealed = context
        .sealed_key_store()
        .ok_or_else(|| anyhow::anyhow!("account check ran before key material was loaded"))?;

    let unlocked = match sealed.open(&session.credential) {
        Ok(unlocked) => unlocked,
        Err(VaultError::IncorrectPassword) => {
            return Err(PermissionKind::AccountIncorrectPassword.into())
        }
        Err(other) => return Err(anyhow::Error::from(other).into()),
    };

    // Nothing is written before the vault opens.
    // A logout between the session check and here must stay logged out.
    let refreshed = env
        .store
        .touch_session(session, env.clock.now())
        .await?
        .ok_or(PermissionKind::AccountNotLoggedIn)?;
    env.sync.request(&address);

    Ok(ContextFragment::empty()
        .with_key_store(KeyMaterial::Unlocked(Arc::new(unlocked)))
        .with_session(refreshed)
        .with_user(user))
}

async fn domain_approved(
    request: &GuardedRequest,
    env: &AuthEnv,
) -> Result<ContextFragment, Rejection> {
    let asset_id = request.args.asset_id().map_err(anyhow::Error::from)?;
    let approval = env
        .store
        .get_domain_approval(&request.domain)
        .await?
        .filter(|approval| approval.allows(asset_id))
        .ok_or(PermissionKind::DomainNotRegistered)?;

    Ok(ContextFragment::empty().with_domain(approval))
}

async fn entity_domain_access(
    request: &GuardedRequest,
    env: &AuthEnv,
) -> Result<ContextFragment, Rejection> {
    let note_id = request.args.note_id().map_err(anyhow::Error::from)?;

    // Unknown notes are reported like unapproved ones so callers cannot enumerate notes.
    let asset_id = env
        .store
        .resolve_entity_asset(&note_id)
        .await?
        .ok_or(PermissionKind::DomainNotGrantedAccess)?;

    let granted = env
        .store
        .get_domain_approval(&request.domain)
        .await?
        .is_some_and(|approval| approval.allows(asset_id));

    if !granted {
        return Err(PermissionKind::DomainNotGrantedAccess.into());
    }

    Ok(ContextFragment::empty())
}
