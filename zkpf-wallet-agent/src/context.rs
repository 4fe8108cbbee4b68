//! Trust context accumulated by a validator chain.
//!
//! Validators never mutate the context they are handed. Each returns a
//! [`ContextFragment`] and the chain folds it into a new [`TrustContext`]
//! value, later fields overwriting earlier ones.

use std::sync::Arc;

use crate::types::{DomainApproval, RegisteredUser, Session};
use crate::vault::{SealedKeyStore, UnlockedKeyStore};

/// Key material as seen by the chain: sealed until the account step opens it.
#[derive(Clone, Debug)]
pub enum KeyMaterial {
    Sealed(Arc<SealedKeyStore>),
    Unlocked(Arc<UnlockedKeyStore>),
}

/// Evidence produced by a single validator.
#[derive(Clone, Debug, Default)]
pub struct ContextFragment {
    key_store: Option<KeyMaterial>,
    session: Option<Session>,
    user: Option<RegisteredUser>,
    domain: Option<DomainApproval>,
}

impl ContextFragment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_key_store(mut self, key_store: KeyMaterial) -> Self {
        self.key_store = Some(key_store);
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_user(mut self, user: RegisteredUser) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_domain(mut self, domain: DomainApproval) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.key_store.is_none()
            && self.session.is_none()
            && self.user.is_none()
            && self.domain.is_none()
    }
}

/// Everything the chain has established about the caller so far.
#[derive(Clone, Debug, Default)]
pub struct TrustContext {
    key_store: Option<KeyMaterial>,
    session: Option<Session>,
    user: Option<RegisteredUser>,
    domain: Option<DomainApproval>,
    /// Names of the validators merged so far, in order.
    contributors: Vec<&'static str>,
}

impl TrustContext {
    /// New context with `fragment` layered on top of `self`.
    pub fn merge(&self, contributor: &'static str, fragment: ContextFragment) -> TrustContext {
        let mut contributors = self.contributors.clone();
        contributors.push(contributor);

        TrustContext {
            key_store: fragment.key_store.or_else(|| self.key_store.clone()),
            session: fragment.session.or_else(|| self.session.clone()),
            user: fragment.user.or_else(|| self.user.clone()),
            domain: fragment.domain.or_else(|| self.domain.clone()),
            contributors,
        }
    }

    pub fn key_store(&self) -> Option<&KeyMaterial> {
        self.key_store.as_ref()
    }

    pub fn sealed_key_store(&self) -> Option<&SealedKeyStore> {
        match self.key_store.as_ref()? {
            KeyMaterial::Sealed(sealed) => Some(sealed.as_ref()),
            KeyMaterial::Unlocked(_) => None,
        }
    }

    pub fn unlocked_key_store(&self) -> Option<&UnlockedKeyStore> {
        match self.key_store.as_ref()? {
            KeyMaterial::Unlocked(unlocked) => Some(unlocked.as_ref()),
            KeyMaterial::Sealed(_) => None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn user(&self) -> Option<&RegisteredUser> {
        self.user.as_ref()
    }

    pub fn domain(&self) -> Option<&DomainApproval> {
        self.domain.as_ref()
    }

    pub fn contributors(&self) -> &[&'static str] {
        &self.contributors
    }
}
