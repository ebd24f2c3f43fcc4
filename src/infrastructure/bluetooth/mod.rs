//! Bluetooth Module
//!
//! btleplug-backed transport for the controller link and the beacon scan.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (adapter owner, executes BleCommands from BleTransport) │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌───────────┐
//! │  Scanner  │  │ Connection │  │ Protocol  │
//! │           │  │            │  │           │
//! │ - names   │  │ - connect  │  │ - UUIDs   │
//! │ - RSSI    │  │ - GATT     │  │ - payload │
//! │           │  │   writes   │  │   bytes   │
//! └───────────┘  └────────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Controller UUIDs and the one-byte RSSI payload
//! - [`scanner`] - Advertisement to discovery-event conversion
//! - [`connection`] - GATT operations on one peripheral
//! - [`service`] - Adapter event loop and the command-queue transport

pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;

pub use service::{channel, BleCommand, BleTransport, BluetoothService};
