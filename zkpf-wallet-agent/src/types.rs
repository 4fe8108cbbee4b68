//! Identifiers and records shared by the authorization chain and the
//! connection protocol.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vault::CredentialHandle;

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Account address (hex-encoded account public key).
    Address
);

string_id!(
    /// Caller origin, e.g. `https://shop.example`.
    Domain
);

string_id!(
    /// Identifier of one in-flight request, unique per client.
    RequestId
);

string_id!(
    /// Identifier of a connected client (one page-side relay instance).
    ClientId
);

string_id!(
    /// Identifier of a single encrypted balance note.
    EntityId
);

/// Confidential asset identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub u32);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// An unlocked key vault for one account.
///
/// Expiry is sliding (`last_active`) and absolute (`created_at`); see
/// [`crate::session::SessionPolicy`].
#[derive(Clone, Debug)]
pub struct Session {
    pub address: Address,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Credential that opens the sealed key store.
    pub credential: CredentialHandle,
}

impl Session {
    pub fn new(address: Address, credential: CredentialHandle, now: DateTime<Utc>) -> Self {
        Self {
            address,
            created_at: now,
            last_active: now,
            credential,
        }
    }
}

/// Local record of an account linked to this agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    pub address: Address,
    #[serde(default)]
    pub alias: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Assets a caller origin has been allowed to query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainApproval {
    pub domain: Domain,
    pub approved_asset_ids: BTreeSet<AssetId>,
}

impl DomainApproval {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            approved_asset_ids: BTreeSet::new(),
        }
    }

    pub fn allows(&self, asset_id: AssetId) -> bool {
        self.approved_asset_ids.contains(&asset_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&RequestId::new("req-1")).unwrap();
        assert_eq!(json, "\"req-1\"");

        let asset: AssetId = serde_json::from_str("7").unwrap();
        assert_eq!(asset, AssetId(7));
    }

    #[test]
    fn test_domain_approval_allows_only_listed_assets() {
        let mut approval = DomainApproval::new(Domain::from("https://shop.example"));
        approval.approved_asset_ids.insert(AssetId(1));

        assert!(approval.allows(AssetId(1)));
        assert!(!approval.allows(AssetId(2)));
    }
}
