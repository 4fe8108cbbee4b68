//! Sealed key material and the credentials that open it.
//!
//! The spending secret is stored encrypted with AES-256-GCM. The key is a
//! credential derived from the user's password and a per-store salt; a
//! [`Session`] keeps that credential so later calls can reopen the vault
//! without the password.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::session::Clock;
use crate::store::{StoreError, TrustStore};
use crate::types::{Address, Session};

const CREDENTIAL_CONTEXT: &str = "zkpf-wallet-agent 2024 key vault credential v1";

/// Errors from sealing or opening key material.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("no key material installed")]
    NotInitialized,

    #[error("credential does not open the key vault")]
    IncorrectPassword,

    #[error("account not linked: {0}")]
    UnknownAccount(String),

    #[error("sealing failed: {0}")]
    Sealing(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ═══════════════════════════════════════════════════════════════════════════════
// CREDENTIAL HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Derived credential that opens a [`SealedKeyStore`]. Zeroized on drop.
#[derive(Clone)]
pub struct CredentialHandle(Zeroizing<[u8; 32]>);

impl CredentialHandle {
    pub fn derive(password: &str, salt: &[u8; 16]) -> Self {
        let mut material = Zeroizing::new(Vec::with_capacity(salt.len() + password.len()));
        material.extend_from_slice(salt);
        material.extend_from_slice(password.as_bytes());
        Self(Zeroizing::new(blake3::derive_key(CREDENTIAL_CONTEXT, &material)))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    fn as_key(&self) -> &Key<Aes256Gcm> {
        Key::<Aes256Gcm>::from_slice(&self.0[..])
    }
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialHandle(..)")
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEALED / UNLOCKED KEY STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Encrypted spending secret as persisted by the record store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKeyStore {
    pub salt: [u8; 16],
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

impl SealedKeyStore {
    /// Generate a fresh secret and seal it under `password`.
    pub fn generate(password: &str) -> Result<(Self, UnlockedKeyStore), VaultError> {
        let mut secret = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut secret[..]);
        let sealed = Self::seal(&secret, password)?;
        Ok((sealed, UnlockedKeyStore { secret }))
    }

    pub fn seal(secret: &[u8; 32], password: &str) -> Result<Self, VaultError> {
        let mut salt = [0u8; 16];
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce);

        let credential = CredentialHandle::derive(password, &salt);
        let cipher = Aes256Gcm::new(credential.as_key());
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), &secret[..])
            .map_err(|e| VaultError::Sealing(e.to_string()))?;

        Ok(Self {
            salt,
            nonce,
            ciphertext,
        })
    }

    pub fn credential_for(&self, password: &str) -> CredentialHandle {
        CredentialHandle::derive(password, &self.salt)
    }

    pub fn open(&self, credential: &CredentialHandle) -> Result<UnlockedKeyStore, VaultError> {
        let cipher = Aes256Gcm::new(credential.as_key());
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_slice())
                .map_err(|_| VaultError::IncorrectPassword)?,
        );

        let secret: [u8; 32] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::Sealing(format!("unexpected secret length {}", plaintext.len())))?;

        Ok(UnlockedKeyStore {
            secret: Zeroizing::new(secret),
        })
    }
}

/// Decrypted spending secret.
pub struct UnlockedKeyStore {
    secret: Zeroizing<[u8; 32]>,
}

impl UnlockedKeyStore {
    /// Short public fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        hex::encode(&blake3::hash(&self.secret[..]).as_bytes()[..8])
    }

    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }
}

impl fmt::Debug for UnlockedKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedKeyStore")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOGIN / LOGOUT
// ═══════════════════════════════════════════════════════════════════════════════

/// Open the vault with `password` and start a session for `address`.
///
/// Nothing is written unless the password opens the vault.
pub async fn unlock(
    store: &dyn TrustStore,
    clock: &dyn Clock,
    address: &Address,
    password: &str,
) -> Result<Session, VaultError> {
    let sealed = store.key_material().await?.ok_or(VaultError::NotInitialized)?;
    if store.get_registered_user(address).await?.is_none() {
        return Err(VaultError::UnknownAccount(address.to_string()));
    }

    let credential = sealed.credential_for(password);
    let unlocked = sealed.open(&credential)?;

    let session = Session::new(address.clone(), credential, clock.now());
    store.set_session(session.clone()).await?;

    tracing::info!(
        address = %address,
        fingerprint = %unlocked.fingerprint(),
        "key vault unlocked"
    );

    Ok(session)
}

/// Destroy the session for `address`.
pub async fn logout(store: &dyn TrustStore, address: &Address) -> Result<(), VaultError> {
    store.evict_session(address).await?;
    tracing::info!(address = %address, "session closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FixedClock;
    use crate::store::MemoryTrustStore;
    use crate::types::RegisteredUser;
    use chrono::Utc;

    #[test]
    fn test_wrong_password_is_rejected() {
        let (sealed, unlocked) = SealedKeyStore::generate("correct horse").unwrap();

        let reopened = sealed.open(&sealed.credential_for("correct horse")).unwrap();
        assert_eq!(reopened.secret(), unlocked.secret());

        let err = sealed.open(&sealed.credential_for("battery staple")).unwrap_err();
        assert!(matches!(err, VaultError::IncorrectPassword));
    }

    #[test]
    fn test_debug_output_is_redacted() {
        let credential = CredentialHandle::from_bytes([9u8; 32]);
        assert_eq!(format!("{:?}", credential), "CredentialHandle(..)");
    }

    #[tokio::test]
    async fn test_unlock_creates_session_only_on_success() {
        let store = MemoryTrustStore::new();
        let clock = FixedClock::new(Utc::now());
        let address = Address::from("0xabc");

        let (sealed, _) = SealedKeyStore::generate("pw").unwrap();
        store.install_key_material(sealed).await;
        store
            .register_user(RegisteredUser {
                address: address.clone(),
                alias: None,
                registered_at: clock.now(),
            })
            .await;

        let err = unlock(&store, &clock, &address, "nope").await.unwrap_err();
        assert!(matches!(err, VaultError::IncorrectPassword));
        assert_eq!(store.session_count().await, 0);

        let session = unlock(&store, &clock, &address, "pw").await.unwrap();
        assert_eq!(session.created_at, clock.now());
        assert!(store.get_session(&address).await.unwrap().is_some());

        logout(&store, &address).await.unwrap();
        assert!(store.get_session(&address).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unlock_requires_key_material() {
        let store = MemoryTrustStore::new();
        let clock = FixedClock::new(Utc::now());

        let err = unlock(&store, &clock, &Address::from("0xabc"), "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotInitialized));
    }
}
