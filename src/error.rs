//! Error types shared by the tracking core.
//!
//! Only configuration problems are fatal. Transport failures are recovered
//! inside the event loop by resetting the affected link state.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Rejected at construction, never clamped.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failures reported by (or while talking to) the BLE transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport worker is no longer running")]
    ChannelClosed,

    #[error("unknown peripheral {0}")]
    UnknownPeripheral(String),

    #[error("bluetooth error: {0}")]
    Bluetooth(String),
}

impl CoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
