use std::net::SocketAddr;
use std::time::Duration;

/// Failures surfaced by the device control and telemetry components.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("no hub answered discovery within {0:?} and no backup address is configured")]
    DiscoveryTimeout(Duration),

    #[error("no acknowledgement from {addr} within {timeout:?}")]
    SendTimeout { addr: SocketAddr, timeout: Duration },

    #[error("failed to decrypt payload: {0}")]
    Decryption(String),

    #[error("device {id} has type {device_type} which cannot be switched")]
    DeviceTypeUnknown { id: u32, device_type: String },

    #[error("device {id} has type {device_type} which cannot be dimmed")]
    DeviceNotDimmable { id: u32, device_type: String },

    #[error("device {id} has type {device_type} which has no color control")]
    DeviceNotColorable { id: u32, device_type: String },

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("upstream: {0}")]
    Upstream(String),

    #[error("device {0} not found")]
    DeviceNotFound(u32),
}

impl HubError {
    /// Wraps an `anyhow` chain, keeping the full context in the message
    pub fn upstream(err: anyhow::Error) -> Self {
        Self::Upstream(format!("{err:#}"))
    }
}

impl From<std::io::Error> for HubError {
    fn from(err: std::io::Error) -> Self {
        Self::Upstream(format!("io: {err:#}"))
    }
}
