//! BLE Scanner Module
//!
//! Turns adapter advertisement updates into discovery events carrying the
//! advertised name and RSSI.

use crate::domain::models::{PeripheralHandle, TransportEvent, RSSI_SENTINEL};
use anyhow::Result;
use btleplug::api::{Central, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use tracing::{debug, info};

/// Stable handle for a btleplug peripheral id.
pub fn handle_for(id: &PeripheralId) -> PeripheralHandle {
    PeripheralHandle::new(format!("{:?}", id))
}

/// Map the adapter's RSSI into the `i8` sample domain.
///
/// Missing or out-of-range readings become the sentinel.
pub fn rssi_sample(rssi: Option<i16>) -> i8 {
    rssi.and_then(|r| i8::try_from(r).ok())
        .unwrap_or(RSSI_SENTINEL)
}

/// BLE Scanner for the controller and the luggage beacons
pub struct BleScanner {
    scanning: bool,
}

impl BleScanner {
    pub fn new() -> Self {
        Self { scanning: false }
    }

    /// Start scanning for all BLE devices
    ///
    /// No service filter: the beacons advertise nothing but a name.
    pub async fn start(&mut self, adapter: &Adapter) -> Result<()> {
        if self.scanning {
            return Ok(());
        }
        info!("Starting BLE scan");
        adapter.start_scan(ScanFilter::default()).await?;
        self.scanning = true;
        Ok(())
    }

    pub async fn stop(&mut self, adapter: &Adapter) -> Result<()> {
        if self.scanning {
            info!("Stopping BLE scan...");
            adapter.stop_scan().await?;
            self.scanning = false;
        }
        Ok(())
    }

    /// Resolve an advertisement update into a discovery event.
    ///
    /// Peripherals that don't advertise a name are skipped.
    pub async fn describe(
        adapter: &Adapter,
        id: &PeripheralId,
    ) -> Result<Option<(Peripheral, TransportEvent)>> {
        let peripheral = adapter.peripheral(id).await?;
        let Some(props) = peripheral.properties().await? else {
            return Ok(None);
        };
        let Some(name) = props.local_name else {
            return Ok(None);
        };

        let handle = handle_for(id);
        debug!("Advertisement from {} ({}) rssi {:?}", name, handle, props.rssi);
        let event = TransportEvent::DeviceDiscovered {
            peripheral: handle,
            name,
            rssi: rssi_sample(props.rssi),
        };
        Ok(Some((peripheral, event)))
    }
}

impl Default for BleScanner {
    fn default() -> Self {
        Self::new()
    }
}
