//! Bluetooth Service Module
//!
//! Owns the adapter, runs the scan and executes transport commands. The
//! tracker talks to it only through [`BleTransport`], which queues commands
//! and never waits for them.

use crate::domain::models::{AppEvent, PeripheralHandle, TransportEvent, WriteMode};
use crate::domain::transport::Transport;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::{
    connection::BleConnection,
    scanner::{handle_for, BleScanner},
};
use anyhow::Result;
use btleplug::api::{Central, CentralEvent, Manager as _};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Requests queued by [`BleTransport`] for the service task.
#[derive(Debug, Clone, PartialEq)]
pub enum BleCommand {
    Connect(PeripheralHandle),
    Disconnect(PeripheralHandle),
    DiscoverServices {
        peripheral: PeripheralHandle,
        services: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        peripheral: PeripheralHandle,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    Write {
        peripheral: PeripheralHandle,
        characteristic: Uuid,
        bytes: Vec<u8>,
        mode: WriteMode,
    },
    SetNotify {
        peripheral: PeripheralHandle,
        characteristic: Uuid,
        enabled: bool,
    },
}

impl BleCommand {
    fn peripheral(&self) -> &PeripheralHandle {
        match self {
            Self::Connect(p) | Self::Disconnect(p) => p,
            Self::DiscoverServices { peripheral, .. }
            | Self::DiscoverCharacteristics { peripheral, .. }
            | Self::Write { peripheral, .. }
            | Self::SetNotify { peripheral, .. } => peripheral,
        }
    }
}

/// Create the command queue between the tracker and the service task.
pub fn channel() -> (BleTransport, mpsc::UnboundedReceiver<BleCommand>) {
    let (commands, receiver) = mpsc::unbounded_channel();
    (BleTransport { commands }, receiver)
}

/// [`Transport`] implementation backed by the service task.
#[derive(Clone)]
pub struct BleTransport {
    commands: mpsc::UnboundedSender<BleCommand>,
}

impl BleTransport {
    fn send(&self, command: BleCommand) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::ChannelClosed)
    }
}

impl Transport for BleTransport {
    fn connect(&mut self, peripheral: &PeripheralHandle) -> Result<(), TransportError> {
        self.send(BleCommand::Connect(peripheral.clone()))
    }

    fn disconnect(&mut self, peripheral: &PeripheralHandle) -> Result<(), TransportError> {
        self.send(BleCommand::Disconnect(peripheral.clone()))
    }

    fn discover_services(
        &mut self,
        peripheral: &PeripheralHandle,
        services: &[Uuid],
    ) -> Result<(), TransportError> {
        self.send(BleCommand::DiscoverServices {
            peripheral: peripheral.clone(),
            services: services.to_vec(),
        })
    }

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralHandle,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<(), TransportError> {
        self.send(BleCommand::DiscoverCharacteristics {
            peripheral: peripheral.clone(),
            service,
            characteristics: characteristics.to_vec(),
        })
    }

    fn write_value(
        &mut self,
        peripheral: &PeripheralHandle,
        characteristic: Uuid,
        bytes: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        self.send(BleCommand::Write {
            peripheral: peripheral.clone(),
            characteristic,
            bytes: bytes.to_vec(),
            mode,
        })
    }

    fn set_notify(
        &mut self,
        peripheral: &PeripheralHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.send(BleCommand::SetNotify {
            peripheral: peripheral.clone(),
            characteristic,
            enabled,
        })
    }
}

/// Main Bluetooth service coordinating scanning and GATT operations
pub struct BluetoothService {
    adapter: Adapter,
    scanner: BleScanner,
    peripherals: HashMap<PeripheralHandle, Peripheral>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl BluetoothService {
    /// Open the first Bluetooth adapter.
    pub async fn new(event_sender: mpsc::UnboundedSender<AppEvent>) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapter found"))?;
        info!("Using Bluetooth adapter {}", adapter.adapter_info().await?);

        Ok(Self {
            adapter,
            scanner: BleScanner::new(),
            peripherals: HashMap::new(),
            event_sender,
        })
    }

    /// Scan and serve commands until the command queue closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BleCommand>) -> Result<()> {
        let mut events = self.adapter.events().await?;
        self.scanner.start(&self.adapter).await?;

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(event) => self.on_central_event(event).await,
                    None => {
                        warn!("Adapter event stream ended");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => self.execute(command),
                    None => break,
                },
            }
        }

        self.scanner.stop(&self.adapter).await
    }

    async fn on_central_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                match BleScanner::describe(&self.adapter, &id).await {
                    Ok(Some((peripheral, event))) => {
                        if let TransportEvent::DeviceDiscovered { peripheral: handle, .. } = &event {
                            self.peripherals.insert(handle.clone(), peripheral);
                        }
                        self.send(event);
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Could not read advertisement: {}", e),
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let handle = handle_for(&id);
                if self.peripherals.contains_key(&handle) {
                    self.send(TransportEvent::Disconnected {
                        peripheral: handle,
                        reason: None,
                    });
                }
            }
            _ => {}
        }
    }

    /// Run the command on its own task so the adapter stream keeps flowing.
    fn execute(&self, command: BleCommand) {
        let Some(peripheral) = self.peripherals.get(command.peripheral()) else {
            warn!("Command for unknown peripheral {}", command.peripheral());
            self.report_unknown(command);
            return;
        };
        let connection = BleConnection::new(
            peripheral.clone(),
            command.peripheral().clone(),
            self.event_sender.clone(),
        );

        tokio::spawn(async move {
            match command {
                BleCommand::Connect(_) => connection.connect().await,
                BleCommand::Disconnect(_) => connection.disconnect().await,
                BleCommand::DiscoverServices { services, .. } => {
                    connection.discover_services(&services).await
                }
                BleCommand::DiscoverCharacteristics {
                    service,
                    characteristics,
                    ..
                } => {
                    connection
                        .discover_characteristics(service, &characteristics)
                        .await
                }
                BleCommand::Write {
                    characteristic,
                    bytes,
                    mode,
                    ..
                } => connection.write(characteristic, &bytes, mode).await,
                BleCommand::SetNotify {
                    characteristic,
                    enabled,
                    ..
                } => connection.set_notify(characteristic, enabled).await,
            }
        });
    }

    /// Answer commands for peripherals we never saw so the tracker doesn't wait forever.
    fn report_unknown(&self, command: BleCommand) {
        let reason = TransportError::UnknownPeripheral(command.peripheral().to_string());
        let event = match command {
            BleCommand::Connect(peripheral) => TransportEvent::ConnectFailed {
                peripheral,
                reason: reason.to_string(),
            },
            BleCommand::Write {
                peripheral,
                characteristic,
                ..
            } => TransportEvent::WriteCompleted {
                peripheral,
                characteristic,
                error: Some(reason.to_string()),
            },
            BleCommand::DiscoverServices { peripheral, .. }
            | BleCommand::DiscoverCharacteristics { peripheral, .. } => {
                TransportEvent::Disconnected {
                    peripheral,
                    reason: Some(reason.to_string()),
                }
            }
            BleCommand::Disconnect(_) | BleCommand::SetNotify { .. } => return,
        };
        self.send(event);
    }

    fn send(&self, event: TransportEvent) {
        let _ = self.event_sender.send(AppEvent::Transport(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_queues_commands() {
        let (mut transport, mut commands) = channel();
        let p = PeripheralHandle::new("p");
        transport.connect(&p).unwrap();
        transport
            .write_value(&p, Uuid::nil(), &[0xC3], WriteMode::WithResponse)
            .unwrap();

        assert_eq!(commands.try_recv().unwrap(), BleCommand::Connect(p.clone()));
        assert_eq!(
            commands.try_recv().unwrap(),
            BleCommand::Write {
                peripheral: p,
                characteristic: Uuid::nil(),
                bytes: vec![0xC3],
                mode: WriteMode::WithResponse,
            }
        );
    }

    #[test]
    fn test_transport_reports_closed_worker() {
        let (mut transport, commands) = channel();
        drop(commands);
        assert_eq!(
            transport.connect(&PeripheralHandle::new("p")),
            Err(TransportError::ChannelClosed)
        );
    }
}
