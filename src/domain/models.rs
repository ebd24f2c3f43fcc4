use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// RSSI value the radio stack reports when the reading is unknown or out of range.
pub const RSSI_SENTINEL: i8 = 127;

/// Physical position of a tracked beacon.
///
/// Resolved once from the advertised name when the registry is built; all
/// later branching happens on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeaconRole {
    Left,
    Right,
}

impl BeaconRole {
    /// Fixed enumeration order used for timer-paced transmissions.
    pub const ALL: [BeaconRole; 2] = [BeaconRole::Left, BeaconRole::Right];

    /// Whether samples from this beacon are converted to their absolute value.
    pub fn absolute(self) -> bool {
        match self {
            Self::Left => true,
            Self::Right => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for BeaconRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque peripheral identifier handed out by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralHandle(String);

impl PeripheralHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl CharacteristicProperties {
    pub fn supports_write(&self) -> bool {
        self.write || self.write_without_response
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// Events emitted by the BLE transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    DeviceDiscovered {
        peripheral: PeripheralHandle,
        name: String,
        rssi: i8,
    },
    Connected {
        peripheral: PeripheralHandle,
    },
    ConnectFailed {
        peripheral: PeripheralHandle,
        reason: String,
    },
    Disconnected {
        peripheral: PeripheralHandle,
        reason: Option<String>,
    },
    ServicesDiscovered {
        peripheral: PeripheralHandle,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralHandle,
        service: Uuid,
        characteristics: Vec<DiscoveredCharacteristic>,
    },
    WriteCompleted {
        peripheral: PeripheralHandle,
        characteristic: Uuid,
        error: Option<String>,
    },
}

/// Everything the event loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Transport(TransportEvent),
    /// Periodic trigger; `epoch` identifies the ticker that produced it.
    Tick { epoch: u64 },
}

impl From<TransportEvent> for AppEvent {
    fn from(event: TransportEvent) -> Self {
        Self::Transport(event)
    }
}

/// Last raw sample and current smoothed value of one beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub last_raw: i8,
    pub average: i8,
}

/// Copy-out view of both beacons for the presentation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub left: Option<Reading>,
    pub right: Option<Reading>,
}

impl Snapshot {
    pub fn get(&self, role: BeaconRole) -> Option<Reading> {
        match role {
            BeaconRole::Left => self.left,
            BeaconRole::Right => self.right,
        }
    }

    pub fn set(&mut self, role: BeaconRole, reading: Reading) {
        match role {
            BeaconRole::Left => self.left = Some(reading),
            BeaconRole::Right => self.right = Some(reading),
        }
    }
}
