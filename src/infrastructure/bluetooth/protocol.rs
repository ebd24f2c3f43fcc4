//! Controller protocol
//!
//! The controller (an Arduino behind an HM-10 style UART bridge) receives one
//! byte per write: the smoothed RSSI of one beacon as a two's-complement `i8`.
//! There is no header, length prefix or checksum.

use crate::error::CoreError;
use uuid::Uuid;

/// HM-10 UART service
pub const SERVICE_UUID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";

/// HM-10 UART characteristic - written by us, bytes show up on the Arduino serial port
pub const WRITE_CHAR_UUID: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

/// Encode a smoothed RSSI as the single-byte wire payload.
pub fn encode_rssi(rssi: i8) -> [u8; 1] {
    rssi.to_le_bytes()
}

/// Parse a hyphenated UUID string.
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(uuid_str)
        .map_err(|e| CoreError::invalid(format!("invalid UUID {uuid_str:?}: {e}")))
}
