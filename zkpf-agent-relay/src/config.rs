//! Relay configuration.
//!
//! Read from an optional file and `ZKPF_RELAY__*` environment variables,
//! e.g. `ZKPF_RELAY__BIND_ADDR=0.0.0.0:3002`.

use std::path::Path;

use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "ZKPF_RELAY";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_addr: String,
    /// Path approval-surface clients connect on. Every other path is a page client.
    pub ui_path: String,
    /// Emit logs as JSON lines.
    pub log_json: bool,
    /// Approval requests buffered per UI client.
    pub ui_channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3002".into(),
            ui_path: "/ui".into(),
            log_json: false,
            ui_channel_capacity: 64,
        }
    }
}

impl RelayConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: RelayConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if !config.ui_path.starts_with('/') {
            return Err(config::ConfigError::Message(format!(
                "ui_path must start with '/': {}",
                config.ui_path
            )));
        }
        if config.ui_channel_capacity == 0 {
            return Err(config::ConfigError::Message(
                "ui_channel_capacity must be positive".into(),
            ));
        }

        Ok(config)
    }
}
