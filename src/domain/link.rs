//! Connection state machine for the controller peripheral.
//!
//! ```text
//! Idle ──discovered──▶ Connecting ──connected──▶ Connected ──services──▶ ServicesDiscovered
//!   ▲                      │                        │                          │
//!   │                 connect failed          service missing        characteristics
//!   │                      ▼                        ▼                          ▼
//!   └──rediscovery── Failed / Disconnected ◀──disconnect── CharacteristicReady
//! ```
//!
//! Every transition is a method that consumes one transport event and returns at
//! most one [`LinkAction`] for the caller to carry out. Retries are unlimited and
//! driven only by later discovery events.

use crate::domain::models::{DiscoveredCharacteristic, PeripheralHandle, WriteMode};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    ConnectFailed(String),
    ServiceMissing,
    CharacteristicMissing,
    CharacteristicNotWritable,
}

/// Resolved write target, cached once the link is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub mode: WriteMode,
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    ServicesDiscovered { service: Uuid },
    CharacteristicReady(WriteTarget),
    Disconnected,
    Failed(FailureReason),
}

impl LinkState {
    /// States from which a fresh discovery starts a new attempt.
    fn accepts_discovery(&self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected | Self::Failed(_))
    }
}

/// Requests the state machine hands back to the transport owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    Connect(PeripheralHandle),
    DiscoverServices {
        peripheral: PeripheralHandle,
        services: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        peripheral: PeripheralHandle,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    /// Release a connection that can't be used.
    Disconnect(PeripheralHandle),
    /// Writes may start.
    Ready(WriteTarget),
    /// A ready link went away; writes must stop.
    Lost,
}

#[derive(Debug, Clone)]
pub struct ControllerLink {
    state: LinkState,
    peripheral: Option<PeripheralHandle>,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    preferred_mode: WriteMode,
}

impl ControllerLink {
    pub fn new(service_uuid: Uuid, characteristic_uuid: Uuid, preferred_mode: WriteMode) -> Self {
        Self {
            state: LinkState::Idle,
            peripheral: None,
            service_uuid,
            characteristic_uuid,
            preferred_mode,
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.peripheral.as_ref()
    }

    pub fn is_write_ready(&self) -> bool {
        matches!(self.state, LinkState::CharacteristicReady(_))
    }

    /// Peripheral and cached characteristic, only while `CharacteristicReady`.
    pub fn write_target(&self) -> Option<(&PeripheralHandle, &WriteTarget)> {
        match (&self.state, &self.peripheral) {
            (LinkState::CharacteristicReady(target), Some(peripheral)) => Some((peripheral, target)),
            _ => None,
        }
    }

    /// The controller was seen advertising.
    pub fn on_discovered(&mut self, peripheral: &PeripheralHandle) -> Option<LinkAction> {
        if !self.state.accepts_discovery() {
            return None;
        }
        info!("Controller discovered ({}), connecting", peripheral);
        self.peripheral = Some(peripheral.clone());
        self.state = LinkState::Connecting;
        Some(LinkAction::Connect(peripheral.clone()))
    }

    pub fn on_connected(&mut self, peripheral: &PeripheralHandle) -> Option<LinkAction> {
        if !self.owns(peripheral) || self.state != LinkState::Connecting {
            debug!("Ignoring connect from {} in {:?}", peripheral, self.state);
            return None;
        }
        info!("Controller connected, discovering services");
        self.state = LinkState::Connected;
        Some(LinkAction::DiscoverServices {
            peripheral: peripheral.clone(),
            services: vec![self.service_uuid],
        })
    }

    pub fn on_connect_failed(
        &mut self,
        peripheral: &PeripheralHandle,
        reason: &str,
    ) -> Option<LinkAction> {
        if !self.owns(peripheral) {
            return None;
        }
        match self.state {
            LinkState::Connecting | LinkState::Connected => {
                warn!("Controller connection failed: {}", reason);
                self.state = LinkState::Failed(FailureReason::ConnectFailed(reason.to_string()));
            }
            LinkState::ServicesDiscovered { .. } => {
                warn!("Controller connection failed: {}", reason);
                self.state = LinkState::Disconnected;
            }
            LinkState::CharacteristicReady(_) => {
                warn!("Controller connection failed: {}", reason);
                self.state = LinkState::Disconnected;
                return Some(LinkAction::Lost);
            }
            _ => {}
        }
        None
    }

    pub fn on_disconnected(
        &mut self,
        peripheral: &PeripheralHandle,
        reason: Option<&str>,
    ) -> Option<LinkAction> {
        if !self.owns(peripheral) {
            return None;
        }
        let was_ready = self.is_write_ready();
        match self.state {
            LinkState::Idle | LinkState::Disconnected | LinkState::Failed(_) => return None,
            _ => {
                info!(
                    "Controller disconnected: {}",
                    reason.unwrap_or("no reason given")
                );
                self.state = LinkState::Disconnected;
            }
        }
        was_ready.then_some(LinkAction::Lost)
    }

    pub fn on_services_discovered(
        &mut self,
        peripheral: &PeripheralHandle,
        services: &[Uuid],
    ) -> Option<LinkAction> {
        if !self.owns(peripheral) || self.state != LinkState::Connected {
            return None;
        }
        if !services.contains(&self.service_uuid) {
            warn!("Controller does not expose service {}", self.service_uuid);
            return self.fail(FailureReason::ServiceMissing);
        }
        info!("Controller service found, discovering characteristics");
        self.state = LinkState::ServicesDiscovered {
            service: self.service_uuid,
        };
        Some(LinkAction::DiscoverCharacteristics {
            peripheral: peripheral.clone(),
            service: self.service_uuid,
            characteristics: vec![self.characteristic_uuid],
        })
    }

    pub fn on_characteristics_discovered(
        &mut self,
        peripheral: &PeripheralHandle,
        service: Uuid,
        characteristics: &[DiscoveredCharacteristic],
    ) -> Option<LinkAction> {
        let expected = LinkState::ServicesDiscovered {
            service: self.service_uuid,
        };
        if !self.owns(peripheral) || self.state != expected || service != self.service_uuid {
            return None;
        }

        let Some(found) = characteristics
            .iter()
            .find(|c| c.uuid == self.characteristic_uuid)
        else {
            warn!("Controller does not expose characteristic {}", self.characteristic_uuid);
            return self.fail(FailureReason::CharacteristicMissing);
        };

        let props = found.properties;
        let mode = match self.preferred_mode {
            WriteMode::WithResponse if props.write => WriteMode::WithResponse,
            WriteMode::WithoutResponse if props.write_without_response => {
                WriteMode::WithoutResponse
            }
            _ if props.write => WriteMode::WithResponse,
            _ if props.write_without_response => WriteMode::WithoutResponse,
            _ => {
                warn!("Characteristic {} is not writable", found.uuid);
                return self.fail(FailureReason::CharacteristicNotWritable);
            }
        };

        let target = WriteTarget {
            service,
            characteristic: found.uuid,
            mode,
            notify: props.notify,
        };
        info!("Controller ready, writing {:?} to {}", mode, found.uuid);
        self.state = LinkState::CharacteristicReady(target);
        Some(LinkAction::Ready(target))
    }

    /// A transport call for the current attempt could not be issued.
    pub fn abort(&mut self, reason: &str) -> Option<LinkAction> {
        let was_ready = self.is_write_ready();
        if self.state.accepts_discovery() {
            return None;
        }
        warn!("Controller link reset: {}", reason);
        self.state = LinkState::Failed(FailureReason::ConnectFailed(reason.to_string()));
        was_ready.then_some(LinkAction::Lost)
    }

    fn fail(&mut self, reason: FailureReason) -> Option<LinkAction> {
        self.state = LinkState::Failed(reason);
        self.peripheral.clone().map(LinkAction::Disconnect)
    }

    fn owns(&self, peripheral: &PeripheralHandle) -> bool {
        self.peripheral.as_ref() == Some(peripheral)
    }
}
