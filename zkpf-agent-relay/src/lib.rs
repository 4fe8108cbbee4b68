//! zkpf-agent-relay: WebSocket host for the zkpf wallet agent.
//!
//! Page clients and the approval surface both speak JSON over WebSocket.
//! See [`server`] for the message shapes.

pub mod config;
pub mod server;

pub use config::RelayConfig;
pub use server::{Relay, RelayError};
