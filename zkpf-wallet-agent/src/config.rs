//! Agent configuration.
//!
//! Layered from an optional file and `ZKPF_AGENT__*` environment variables,
//! e.g. `ZKPF_AGENT__APPROVAL_TIMEOUT_SECS=30` or
//! `ZKPF_AGENT__SESSION__IDLE_DAYS=3`. Every field has a default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::session::{SessionPolicy, DEFAULT_SESSION_IDLE_DAYS, DEFAULT_SESSION_MAX_AGE_DAYS};

pub const ENV_PREFIX: &str = "ZKPF_AGENT";

/// Default approval window in seconds.
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// How long a request may wait for a human decision.
    pub approval_timeout_secs: u64,
    pub session: SessionConfig,
    /// Buffered decisions per approval subscriber.
    pub approval_channel_capacity: usize,
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    pub sync_queue_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            approval_timeout_secs: DEFAULT_APPROVAL_TIMEOUT_SECS,
            session: SessionConfig::default(),
            approval_channel_capacity: 256,
            inbound_capacity: 64,
            outbound_capacity: 64,
            sync_queue_capacity: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_age_days: i64,
    pub idle_days: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_days: DEFAULT_SESSION_MAX_AGE_DAYS,
            idle_days: DEFAULT_SESSION_IDLE_DAYS,
        }
    }
}

impl AgentConfig {
    /// Load from `path` (if given) and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, AgentError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: AgentConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.approval_timeout_secs == 0 {
            return Err(AgentError::InvalidConfig(
                "approval_timeout_secs must be positive".into(),
            ));
        }

        for (name, value) in [
            ("approval_channel_capacity", self.approval_channel_capacity),
            ("inbound_capacity", self.inbound_capacity),
            ("outbound_capacity", self.outbound_capacity),
            ("sync_queue_capacity", self.sync_queue_capacity),
        ] {
            if value == 0 {
                return Err(AgentError::InvalidConfig(format!("{name} must be positive")));
            }
        }

        let max_age_days = self.session.max_age_days;
        let idle_days = self.session.idle_days;
        if max_age_days <= 0 || idle_days <= 0 {
            return Err(AgentError::InvalidConfig(
                "session windows must be positive".into(),
            ));
        }
        if idle_days > max_age_days {
            return Err(AgentError::InvalidConfig(format!(
                "session.idle_days ({idle_days}) exceeds session.max_age_days ({max_age_days})"
            )));
        }

        Ok(())
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            max_age: chrono::Duration::days(self.session.max_age_days),
            idle_timeout: chrono::Duration::days(self.session.idle_days),
        }
    }
}
