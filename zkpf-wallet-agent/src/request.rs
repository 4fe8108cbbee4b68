//! Request view handed to validators and business operations.

use serde_json::{Map, Value};

use crate::error::ArgumentError;
use crate::types::{Address, AssetId, Domain, EntityId};

pub const ARG_ADDRESS: &str = "address";
pub const ARG_ASSET_ID: &str = "assetId";
pub const ARG_NOTE_ID: &str = "noteId";

/// Named arguments of an inbound query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestArgs(Map<String, Value>);

impl RequestArgs {
    pub fn new(args: Map<String, Value>) -> Self {
        Self(args)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|value| !value.is_null())
    }

    /// Fail on the first name in `names` that is absent or null.
    pub fn require(&self, names: &[&str]) -> Result<(), ArgumentError> {
        match names.iter().find(|name| self.get(name).is_none()) {
            Some(missing) => Err(ArgumentError::Missing(missing.to_string())),
            None => Ok(()),
        }
    }

    pub fn str_arg(&self, name: &str) -> Result<&str, ArgumentError> {
        let value = self
            .get(name)
            .ok_or_else(|| ArgumentError::Missing(name.to_string()))?;
        match value.as_str() {
            Some(s) if !s.trim().is_empty() => Ok(s),
            Some(_) => Err(malformed(name, "must not be empty")),
            None => Err(malformed(name, "expected a string")),
        }
    }

    pub fn address(&self) -> Result<Address, ArgumentError> {
        self.str_arg(ARG_ADDRESS).map(Address::from)
    }

    /// Accepts a JSON number or a decimal string.
    pub fn asset_id(&self) -> Result<AssetId, ArgumentError> {
        let value = self
            .get(ARG_ASSET_ID)
            .ok_or_else(|| ArgumentError::Missing(ARG_ASSET_ID.to_string()))?;

        let parsed = match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };

        parsed
            .and_then(|id| u32::try_from(id).ok())
            .map(AssetId)
            .ok_or_else(|| malformed(ARG_ASSET_ID, "expected an unsigned 32-bit asset id"))
    }

    pub fn note_id(&self) -> Result<EntityId, ArgumentError> {
        self.str_arg(ARG_NOTE_ID).map(EntityId::from)
    }

    /// Parse every well-known argument named in `names`.
    ///
    /// Presence is checked first for all names, then the typed accessors run
    /// so a malformed address or id is reported before any validator sees it.
    pub fn check(&self, names: &[&str]) -> Result<(), ArgumentError> {
        self.require(names)?;
        for name in names {
            match *name {
                ARG_ADDRESS => {
                    self.address()?;
                }
                ARG_ASSET_ID => {
                    self.asset_id()?;
                }
                ARG_NOTE_ID => {
                    self.note_id()?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for RequestArgs {
    fn from(args: Map<String, Value>) -> Self {
        Self(args)
    }
}

fn malformed(field: &str, reason: &str) -> ArgumentError {
    ArgumentError::Malformed {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// A request after the connection has attached the caller origin.
#[derive(Clone, Debug, PartialEq)]
pub struct GuardedRequest {
    pub domain: Domain,
    pub args: RequestArgs,
}

impl GuardedRequest {
    pub fn new(domain: Domain, args: RequestArgs) -> Self {
        Self { domain, args }
    }
}
