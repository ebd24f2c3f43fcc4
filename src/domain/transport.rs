//! Call surface of the BLE transport consumed by the tracker.
//!
//! Every call only *issues* a request and returns immediately. Outcomes come
//! back later as [`TransportEvent`](crate::domain::models::TransportEvent)s on
//! the event loop. An `Err` here means the request could not even be issued.

use crate::domain::models::{PeripheralHandle, WriteMode};
use crate::error::TransportError;
use uuid::Uuid;

pub trait Transport {
    fn connect(&mut self, peripheral: &PeripheralHandle) -> Result<(), TransportError>;

    fn disconnect(&mut self, peripheral: &PeripheralHandle) -> Result<(), TransportError>;

    fn discover_services(
        &mut self,
        peripheral: &PeripheralHandle,
        services: &[Uuid],
    ) -> Result<(), TransportError>;

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralHandle,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<(), TransportError>;

    fn write_value(
        &mut self,
        peripheral: &PeripheralHandle,
        characteristic: Uuid,
        bytes: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError>;

    fn set_notify(
        &mut self,
        peripheral: &PeripheralHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), TransportError>;
}
