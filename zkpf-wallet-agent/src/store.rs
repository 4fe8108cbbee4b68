//! Trust Store contract and the in-memory reference store.
//!
//! The agent never implements record-store mechanics. It only requires that
//! every call below is atomic per key: concurrent reads and writes to the same
//! address or domain must not observe partial updates.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{Address, AssetId, Domain, DomainApproval, EntityId, RegisteredUser, Session};
use crate::vault::SealedKeyStore;

/// Faults raised by the record store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record for {key}: {message}")]
    Corrupt { key: String, message: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTRACT
// ═══════════════════════════════════════════════════════════════════════════════

/// Narrow read/write surface the authorization chain consumes.
#[async_trait]
pub trait TrustStore: Send + Sync {
    /// Sealed key material, present once the extension has been set up.
    async fn key_material(&self) -> Result<Option<SealedKeyStore>, StoreError>;

    async fn get_session(&self, address: &Address) -> Result<Option<Session>, StoreError>;

    async fn set_session(&self, session: Session) -> Result<(), StoreError>;

    async fn evict_session(&self, address: &Address) -> Result<(), StoreError>;

    /// Slide `last_active` on the session `current` was read from.
    ///
    /// Returns `None` without writing when that session has since been
    /// evicted or replaced by a newer login.
    async fn touch_session(
        &self,
        current: &Session,
        last_active: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    async fn get_registered_user(
        &self,
        address: &Address,
    ) -> Result<Option<RegisteredUser>, StoreError>;

    async fn get_domain_approval(&self, domain: &Domain)
        -> Result<Option<DomainApproval>, StoreError>;

    /// Asset a note belongs to, if the note is known locally.
    async fn resolve_entity_asset(&self, entity: &EntityId) -> Result<Option<AssetId>, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Trust Store backed by process memory.
///
/// Each map sits behind its own lock, so every contract call is atomic.
#[derive(Default)]
pub struct MemoryTrustStore {
    key_material: RwLock<Option<SealedKeyStore>>,
    sessions: RwLock<HashMap<Address, Session>>,
    users: RwLock<HashMap<Address, RegisteredUser>>,
    domains: RwLock<HashMap<Domain, DomainApproval>>,
    entities: RwLock<HashMap<EntityId, AssetId>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn install_key_material(&self, sealed: SealedKeyStore) {
        *self.key_material.write().await = Some(sealed);
    }

    pub async fn register_user(&self, user: RegisteredUser) {
        self.users.write().await.insert(user.address.clone(), user);
    }

    /// Record a user's approval of `asset_id` for `domain`.
    pub async fn approve_asset(&self, domain: &Domain, asset_id: AssetId) {
        let mut domains = self.domains.write().await;
        domains
            .entry(domain.clone())
            .or_insert_with(|| DomainApproval::new(domain.clone()))
            .approved_asset_ids
            .insert(asset_id);
    }

    pub async fn revoke_domain(&self, domain: &Domain) -> bool {
        self.domains.write().await.remove(domain).is_some()
    }

    pub async fn record_entity(&self, entity: EntityId, asset_id: AssetId) {
        self.entities.write().await.insert(entity, asset_id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl TrustStore for MemoryTrustStore {
    async fn key_material(&self) -> Result<Option<SealedKeyStore>, StoreError> {
        Ok(self.key_material.read().await.clone())
    }

    async fn get_session(&self, address: &Address) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(address).cloned())
    }

    async fn set_session(&self, session: Session) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.address.clone(), session);
        Ok(())
    }

    async fn evict_session(&self, address: &Address) -> Result<(), StoreError> {
        self.sessions.write().await.remove(address);
        Ok(())
    }

    async fn touch_session(
        &self,
        current: &Session,
        last_active: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&current.address) {
            Some(stored) if stored.created_at == current.created_at => {
                stored.last_active = last_active;
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn get_registered_user(
        &self,
        address: &Address,
    ) -> Result<Option<RegisteredUser>, StoreError> {
        Ok(self.users.read().await.get(address).cloned())
    }

    async fn get_domain_approval(
        &self,
        domain: &Domain,
    ) -> Result<Option<DomainApproval>, StoreError> {
        Ok(self.domains.read().await.get(domain).cloned())
    }

    async fn resolve_entity_asset(&self, entity: &EntityId) -> Result<Option<AssetId>, StoreError> {
        Ok(self.entities.read().await.get(entity).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_approve_asset_accumulates_per_domain() {
        let store = MemoryTrustStore::new();
        let domain = Domain::from("https://shop.example");

        store.approve_asset(&domain, AssetId(0)).await;
        store.approve_asset(&domain, AssetId(2)).await;

        let approval = store.get_domain_approval(&domain).await.unwrap().unwrap();
        assert!(approval.allows(AssetId(0)));
        assert!(approval.allows(AssetId(2)));
        assert!(!approval.allows(AssetId(1)));

        assert!(store.revoke_domain(&domain).await);
        assert!(store.get_domain_approval(&domain).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_records_read_as_none() {
        let store = MemoryTrustStore::new();
        let address = Address::from("0xabc");

        assert!(store.key_material().await.unwrap().is_none());
        assert!(store.get_session(&address).await.unwrap().is_none());
        assert!(store.get_registered_user(&address).await.unwrap().is_none());
        assert!(store
            .resolve_entity_asset(&EntityId::from("note-1"))
            .await
            .unwrap()
            .is_none());
    }
}
