//! Named failure modes that cross a component boundary.
//!
//! Everything else propagates as `anyhow::Error` — these variants exist only
//! where a caller needs to match on *which* thing went wrong (startup
//! escalation, §7 of the design).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("no default route found after {secs}s of retrying")]
    NoConnectivity { secs: u64 },
    #[error("interface {0} has no MAC address")]
    NoInterfaceMac(String),
    #[error("interface {0} has no IPv4 address")]
    NoInterfaceIp(String),
}

#[derive(Debug, Error)]
pub enum ForwardingError {
    #[error("unsupported OS for IP forwarding toggle: {0}")]
    UnsupportedOs(String),
    #[error("IP forwarding toggle command exited with status {0}")]
    CommandFailed(i32),
}
