//! BLE Connection Module
//!
//! GATT operations on one peripheral. Each operation runs to completion and
//! reports its outcome as a [`TransportEvent`]; none of them return errors to
//! the caller.

use crate::domain::models::{
    AppEvent, CharacteristicProperties, DiscoveredCharacteristic, PeripheralHandle,
    TransportEvent, WriteMode,
};
use crate::error::TransportError;
use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connection handler for a single peripheral
#[derive(Clone)]
pub struct BleConnection {
    peripheral: Peripheral,
    handle: PeripheralHandle,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl BleConnection {
    pub fn new(
        peripheral: Peripheral,
        handle: PeripheralHandle,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            peripheral,
            handle,
            event_sender,
        }
    }

    pub async fn connect(&self) {
        info!("Connecting to {}", self.handle);
        let event = match self.peripheral.connect().await {
            Ok(()) => TransportEvent::Connected {
                peripheral: self.handle.clone(),
            },
            Err(e) => TransportEvent::ConnectFailed {
                peripheral: self.handle.clone(),
                reason: TransportError::from(e).to_string(),
            },
        };
        self.send(event);
    }

    /// The adapter reports the resulting disconnect as its own event.
    pub async fn disconnect(&self) {
        if let Err(e) = self.peripheral.disconnect().await {
            warn!("Disconnect from {} failed: {}", self.handle, e);
        }
    }

    /// Discover all services and report the UUIDs found.
    ///
    /// btleplug discovers characteristics in the same pass.
    pub async fn discover_services(&self, wanted: &[Uuid]) {
        if let Err(e) = self.peripheral.discover_services().await {
            let e = TransportError::from(e);
            warn!("Service discovery on {} failed: {}", self.handle, e);
            // Release the link so the next attempt starts from a clean connect.
            self.disconnect().await;
            self.send(discovery_failed(&self.handle, &e));
            return;
        }

        let services: Vec<Uuid> = self
            .peripheral
            .services()
            .into_iter()
            .map(|s| s.uuid)
            .collect();
        info!(
            "Found {} services on {} (looking for {:?})",
            services.len(),
            self.handle,
            wanted
        );
        self.send(TransportEvent::ServicesDiscovered {
            peripheral: self.handle.clone(),
            services,
        });
    }

    /// Report the characteristics of `service`, restricted to `wanted` when non-empty.
    pub async fn discover_characteristics(&self, service: Uuid, wanted: &[Uuid]) {
        let characteristics = self
            .peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics)
            .filter(|c| wanted.is_empty() || wanted.contains(&c.uuid))
            .map(|c| DiscoveredCharacteristic {
                uuid: c.uuid,
                properties: properties(c.properties),
            })
            .collect();

        self.send(TransportEvent::CharacteristicsDiscovered {
            peripheral: self.handle.clone(),
            service,
            characteristics,
        });
    }

    pub async fn write(&self, characteristic: Uuid, bytes: &[u8], mode: WriteMode) {
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        let result = match self.find_characteristic(characteristic) {
            Some(c) => self
                .peripheral
                .write(&c, bytes, write_type)
                .await
                .map_err(|e| TransportError::from(e).to_string()),
            None => Err(format!("characteristic {characteristic} not found")),
        };
        debug!("Write {:02X?} to {}: {:?}", bytes, self.handle, result);

        self.send(TransportEvent::WriteCompleted {
            peripheral: self.handle.clone(),
            characteristic,
            error: result.err(),
        });
    }

    pub async fn set_notify(&self, characteristic: Uuid, enabled: bool) {
        let Some(c) = self.find_characteristic(characteristic) else {
            warn!("Cannot change notifications: {} not found", characteristic);
            return;
        };
        let result = if enabled {
            self.peripheral.subscribe(&c).await
        } else {
            self.peripheral.unsubscribe(&c).await
        };
        match result {
            Ok(()) => info!("Notifications on {} set to {}", characteristic, enabled),
            Err(e) => warn!("Could not change notifications on {}: {}", characteristic, e),
        }
    }

    fn find_characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
    }

    fn send(&self, event: TransportEvent) {
        // The event loop is gone during shutdown; nothing left to tell.
        let _ = self.event_sender.send(AppEvent::Transport(event));
    }
}

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        Self::Bluetooth(e.to_string())
    }
}

fn discovery_failed(handle: &PeripheralHandle, e: &TransportError) -> TransportEvent {
    TransportEvent::Disconnected {
        peripheral: handle.clone(),
        reason: Some(format!("service discovery failed: {e}")),
    }
}

fn properties(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_mapping() {
        let props = properties(CharPropFlags::WRITE_WITHOUT_RESPONSE | CharPropFlags::NOTIFY);
        assert!(!props.write);
        assert!(props.write_without_response);
        assert!(props.notify);
        assert!(props.supports_write());

        assert!(!properties(CharPropFlags::READ).supports_write());
    }

    #[test]
    fn test_bluetooth_errors_are_reported() {
        let e = TransportError::from(btleplug::Error::NotConnected);
        assert_eq!(e, TransportError::Bluetooth("Not connected".to_string()));

        let event = discovery_failed(&PeripheralHandle::new("p"), &e);
        assert_eq!(
            event,
            TransportEvent::Disconnected {
                peripheral: PeripheralHandle::new("p"),
                reason: Some("service discovery failed: bluetooth error: Not connected".to_string()),
            }
        );
    }
}
