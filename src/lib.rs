//! Luggage-following controller: smooths the RSSI of two BLE beacons and
//! streams the estimates to a controller peripheral.

pub mod app;
pub mod domain;
pub mod error;
pub mod infrastructure;
