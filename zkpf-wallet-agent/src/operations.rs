//! Query name → guarded operation lookup, and the built-in operations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::chain::Pipeline;
use crate::context::TrustContext;
use crate::error::{ArgumentError, OperationError};
use crate::guard::{Guarded, Operation, Outcome};
use crate::request::GuardedRequest;
use crate::session::SessionPolicy;
use crate::store::TrustStore;

pub const QUERY_SESSION: &str = "session";
pub const QUERY_USER: &str = "user";
pub const QUERY_ASSET: &str = "asset";
pub const QUERY_NOTE: &str = "note";
pub const QUERY_APPROVE_PROOF: &str = "approveProof";

/// UI flow raised by [`ApproveProof`].
pub const ACTION_APPROVE_PROOF: &str = "proof.approve";

/// Guarded operations addressable by query name.
#[derive(Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<Guarded>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in queries.
    pub fn with_builtins(store: Arc<dyn TrustStore>, sessions: SessionPolicy) -> Self {
        let mut registry = Self::new();
        registry.register(QUERY_SESSION, Pipeline::KeyVault, Arc::new(SessionInfo { sessions }));
        registry.register(QUERY_USER, Pipeline::Account, Arc::new(UserInfo));
        registry.register(QUERY_ASSET, Pipeline::Domain, Arc::new(AssetInfo));
        registry.register(QUERY_NOTE, Pipeline::Entity, Arc::new(NoteInfo { store }));
        registry.register(QUERY_APPROVE_PROOF, Pipeline::Account, Arc::new(ApproveProof));
        registry
    }

    /// Bind `operation` behind `pipeline`. An existing entry with the same name is replaced.
    pub fn register(&mut self, name: &str, pipeline: Pipeline, operation: Arc<dyn Operation>) {
        self.insert(name, Guarded::with_pipeline(pipeline, operation));
    }

    pub fn insert(&mut self, name: &str, guarded: Guarded) {
        if self
            .operations
            .insert(name.to_string(), Arc::new(guarded))
            .is_some()
        {
            tracing::debug!(query = name, "replaced registered operation");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<Guarded>, ArgumentError> {
        self.operations
            .get(name)
            .cloned()
            .ok_or_else(|| ArgumentError::UnknownQuery(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILT-IN OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Address and expiry of the caller's session.
struct SessionInfo {
    sessions: SessionPolicy,
}

#[async_trait]
impl Operation for SessionInfo {
    fn name(&self) -> &'static str {
        "session-info"
    }

    async fn execute(
        &self,
        _request: &GuardedRequest,
        context: &TrustContext,
    ) -> Result<Outcome, OperationError> {
        let session = context
            .session()
            .ok_or(OperationError::MissingContext("session"))?;

        Ok(Outcome::Complete(json!({
            "address": session.address,
            "createdAt": session.created_at,
            "lastActive": session.last_active,
            "expiresAt": self.sessions.expires_at(session),
        })))
    }
}

/// The linked user record.
struct UserInfo;

#[async_trait]
impl Operation for UserInfo {
    fn name(&self) -> &'static str {
        "user-info"
    }

    async fn execute(
        &self,
        _request: &GuardedRequest,
        context: &TrustContext,
    ) -> Result<Outcome, OperationError> {
        let user = context.user().ok_or(OperationError::MissingContext("user"))?;
        let keys = context
            .unlocked_key_store()
            .ok_or(OperationError::MissingContext("unlocked key store"))?;

        let mut value = serde_json::to_value(user)?;
        if let Value::Object(map) = &mut value {
            map.insert("keyFingerprint".into(), Value::String(keys.fingerprint()));
        }
        Ok(Outcome::Complete(value))
    }
}

/// The requested asset and the approval that covers it.
struct AssetInfo;

#[async_trait]
impl Operation for AssetInfo {
    fn name(&self) -> &'static str {
        "asset-info"
    }

    async fn execute(
        &self,
        request: &GuardedRequest,
        context: &TrustContext,
    ) -> Result<Outcome, OperationError> {
        let approval = context
            .domain()
            .ok_or(OperationError::MissingContext("domain approval"))?;
        let asset_id = request
            .args
            .asset_id()
            .map_err(|e| OperationError::Failed(e.to_string()))?;

        Ok(Outcome::Complete(json!({
            "assetId": asset_id,
            "domain": approval.domain,
            "approvedAssetIds": approval.approved_asset_ids,
        })))
    }
}

/// The asset a note belongs to.
struct NoteInfo {
    store: Arc<dyn TrustStore>,
}

#[async_trait]
impl Operation for NoteInfo {
    fn name(&self) -> &'static str {
        "note-info"
    }

    async fn execute(
        &self,
        request: &GuardedRequest,
        _context: &TrustContext,
    ) -> Result<Outcome, OperationError> {
        let note_id = request
            .args
            .note_id()
            .map_err(|e| OperationError::Failed(e.to_string()))?;
        let asset_id = self
            .store
            .resolve_entity_asset(&note_id)
            .await?
            .ok_or_else(|| OperationError::Failed(format!("note {note_id} vanished")))?;

        Ok(Outcome::Complete(json!({
            "noteId": note_id,
            "assetId": asset_id,
        })))
    }
}

/// Asks the user to approve a proof request; the approved payload is the result.
struct ApproveProof;

#[async_trait]
impl Operation for ApproveProof {
    fn name(&self) -> &'static str {
        "approve-proof"
    }

    async fn execute(
        &self,
        request: &GuardedRequest,
        context: &TrustContext,
    ) -> Result<Outcome, OperationError> {
        let user = context.user().ok_or(OperationError::MissingContext("user"))?;

        Ok(Outcome::NeedsApproval {
            action: ACTION_APPROVE_PROOF.to_string(),
            prompt: json!({
                "address": user.address,
                "domain": request.domain,
                "args": request.args.to_value(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTrustStore;

    fn registry() -> OperationRegistry {
        OperationRegistry::with_builtins(Arc::new(MemoryTrustStore::new()), SessionPolicy::default())
    }

    #[test]
    fn test_builtins_are_registered() {
        assert_eq!(
            registry().names(),
            vec!["approveProof", "asset", "note", "session", "user"]
        );
    }

    #[test]
    fn test_unknown_query() {
        let err = registry().get("transfer").err().unwrap();
        assert_eq!(err, ArgumentError::UnknownQuery("transfer".into()));
    }

    #[test]
    fn test_builtin_pipelines() {
        let registry = registry();
        let chain_of = |name: &str| registry.get(name).unwrap().chain().name();

        assert_eq!(chain_of(QUERY_SESSION), "keyvault");
        assert_eq!(chain_of(QUERY_USER), "account");
        assert_eq!(chain_of(QUERY_ASSET), "domain");
        assert_eq!(chain_of(QUERY_NOTE), "entity");
        assert_eq!(chain_of(QUERY_APPROVE_PROOF), "account");
        assert_eq!(
            registry.get(QUERY_ASSET).unwrap().required_args(),
            &["address", "assetId"]
        );
    }
}
