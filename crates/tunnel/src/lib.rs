//! Public-URL tunnel provisioning.
//!
//! Wraps an external tunnel agent (ngrok) behind a narrow [`TunnelController`]
//! seam so the provisioning logic and its teardown guarantees can be tested
//! without the binary. The real controller drives the agent as a child
//! process; tests inject a fake.

pub mod agent;
pub mod error;
pub mod provision;

pub use agent::{NgrokAgent, TunnelController};
pub use error::{Result, TunnelError};
pub use provision::{TunnelGuard, TunnelOptions, open, resolve_executable};
