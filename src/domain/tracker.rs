//! Luggage tracker
//!
//! Single owner of the beacon registry, the controller link and the write
//! scheduler. All mutation happens through [`LuggageTracker::handle_event`],
//! called from one event loop; the presentation side only gets copies through
//! the [`DisplaySink`].

use crate::domain::display::DisplaySink;
use crate::domain::link::{ControllerLink, LinkAction};
use crate::domain::models::{AppEvent, BeaconRole, PeripheralHandle, Snapshot, TransportEvent};
use crate::domain::registry::PeripheralRegistry;
use crate::domain::scheduler::{PendingWrite, TickerControl, TransmissionScheduler};
use crate::domain::settings::TrackerConfig;
use crate::domain::transport::Transport;
use crate::error::CoreError;
use crate::infrastructure::bluetooth::protocol;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

pub struct LuggageTracker<T, D> {
    controller_name: String,
    subscribe_notifications: bool,
    registry: PeripheralRegistry,
    link: ControllerLink,
    scheduler: TransmissionScheduler,
    transport: T,
    display: D,
}

impl<T: Transport, D: DisplaySink> LuggageTracker<T, D> {
    pub fn new(config: &TrackerConfig, transport: T, display: D) -> Result<Self, CoreError> {
        if config.controller_name.is_empty() {
            return Err(CoreError::invalid("controller name must not be empty"));
        }
        let registry = PeripheralRegistry::new(
            &config.left_beacon_name,
            &config.right_beacon_name,
            config.filter_period,
            config.sentinel_fallback,
        )?;
        if registry.contains_name(&config.controller_name) {
            return Err(CoreError::invalid(format!(
                "controller name {:?} is also a beacon name",
                config.controller_name
            )));
        }

        Ok(Self {
            controller_name: config.controller_name.clone(),
            subscribe_notifications: config.subscribe_notifications,
            registry,
            link: ControllerLink::new(
                config.service_uuid,
                config.write_char_uuid,
                config.write_mode,
            ),
            scheduler: TransmissionScheduler::new(
                config.transmission_mode,
                config.send_interval,
                config.max_pending_writes,
            ),
            transport,
            display,
        })
    }

    pub fn registry(&self) -> &PeripheralRegistry {
        &self.registry
    }

    pub fn link(&self) -> &ControllerLink {
        &self.link
    }

    pub fn scheduler(&self) -> &TransmissionScheduler {
        &self.scheduler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn snapshot(&self) -> Snapshot {
        self.registry.snapshot()
    }

    /// Process one event. The returned control, if any, must be applied to the ticker.
    pub fn handle_event(&mut self, event: AppEvent) -> Option<TickerControl> {
        match event {
            AppEvent::Tick { epoch } => {
                self.on_tick(epoch);
                None
            }
            AppEvent::Transport(event) => self.on_transport_event(event),
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> Option<TickerControl> {
        let action = match event {
            TransportEvent::DeviceDiscovered {
                peripheral,
                name,
                rssi,
            } => {
                if name == self.controller_name {
                    self.link.on_discovered(&peripheral)
                } else if let Some(role) = self.registry.resolve(&name) {
                    self.on_rssi(role, rssi);
                    None
                } else {
                    trace!("Ignoring {} ({})", name, peripheral);
                    None
                }
            }
            TransportEvent::Connected { peripheral } => self.link.on_connected(&peripheral),
            TransportEvent::ConnectFailed { peripheral, reason } => {
                self.link.on_connect_failed(&peripheral, &reason)
            }
            TransportEvent::Disconnected { peripheral, reason } => {
                self.link.on_disconnected(&peripheral, reason.as_deref())
            }
            TransportEvent::ServicesDiscovered {
                peripheral,
                services,
            } => self.link.on_services_discovered(&peripheral, &services),
            TransportEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
            } => self
                .link
                .on_characteristics_discovered(&peripheral, service, &characteristics),
            TransportEvent::WriteCompleted {
                peripheral,
                characteristic,
                error,
            } => {
                self.on_write_completed(&peripheral, characteristic, error);
                None
            }
        };

        action.and_then(|action| self.apply(action))
    }

    fn on_rssi(&mut self, role: BeaconRole, rssi: i8) {
        let source = self.registry.get_mut(role);
        let reading = source.sample(rssi);
        debug!(
            "{} rssi {} -> raw {} avg {}",
            role, rssi, reading.last_raw, reading.average
        );
        self.display.show(role, reading);

        let payload = protocol::encode_rssi(reading.average);
        let next = self.scheduler.on_sample(role, payload);
        self.drive(next);
    }

    fn on_tick(&mut self, epoch: u64) {
        if !self.scheduler.accepts_tick(epoch) {
            trace!("Dropping tick from epoch {}", epoch);
            return;
        }
        let payloads: Vec<_> = self
            .registry
            .iter()
            .filter_map(|source| Some((source.role(), source.encoded_payload()?)))
            .collect();
        let next = self.scheduler.on_tick(epoch, payloads);
        self.drive(next);
    }

    fn on_write_completed(
        &mut self,
        peripheral: &PeripheralHandle,
        characteristic: Uuid,
        error: Option<String>,
    ) {
        if self.link.peripheral() != Some(peripheral) {
            debug!("Write completion from stale peripheral {}", peripheral);
            self.scheduler.on_orphan_completed();
            return;
        }
        if let Some(error) = error {
            warn!("Write to {} failed: {}", characteristic, error);
        }
        let next = self.scheduler.on_write_completed();
        self.drive(next);
    }

    /// Issue writes until one is accepted by the transport or none are left.
    fn drive(&mut self, mut next: Option<PendingWrite>) {
        while let Some(write) = next.take() {
            let Some((peripheral, target)) = self.link.write_target() else {
                // Unready writes are dropped silently.
                self.scheduler.discard_in_flight();
                return;
            };
            match self.transport.write_value(
                peripheral,
                target.characteristic,
                &write.payload,
                target.mode,
            ) {
                Ok(()) => {
                    trace!("Wrote {} payload {:?}", write.role, write.payload);
                }
                Err(e) => {
                    warn!("Could not issue write: {}", e);
                    next = self.scheduler.on_write_not_issued();
                }
            }
        }
    }

    fn apply(&mut self, action: LinkAction) -> Option<TickerControl> {
        let result = match &action {
            LinkAction::Connect(peripheral) => self.transport.connect(peripheral),
            LinkAction::Disconnect(peripheral) => self.transport.disconnect(peripheral),
            LinkAction::DiscoverServices {
                peripheral,
                services,
            } => self.transport.discover_services(peripheral, services),
            LinkAction::DiscoverCharacteristics {
                peripheral,
                service,
                characteristics,
            } => self
                .transport
                .discover_characteristics(peripheral, *service, characteristics),
            LinkAction::Ready(target) => {
                if self.subscribe_notifications && target.notify {
                    if let Some(peripheral) = self.link.peripheral() {
                        if let Err(e) =
                            self.transport
                                .set_notify(peripheral, target.characteristic, true)
                        {
                            warn!("Could not enable notifications: {}", e);
                        }
                    }
                }
                info!("Starting transmissions ({:?})", self.scheduler.mode());
                return self.scheduler.start();
            }
            LinkAction::Lost => {
                info!("Stopping transmissions");
                return self.scheduler.reset();
            }
        };

        match result {
            Ok(()) => None,
            Err(e) => {
                // Nothing will answer this request; start over on the next discovery.
                if matches!(action, LinkAction::Disconnect(_)) {
                    debug!("Disconnect request failed: {}", e);
                    return None;
                }
                self.link
                    .abort(&e.to_string())
                    .and_then(|action| self.apply(action))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::models::{
        CharacteristicProperties, DiscoveredCharacteristic, Reading, WriteMode, RSSI_SENTINEL,
    };
    use crate::domain::scheduler::TransmissionMode;
    use crate::domain::settings::Settings;
    use crate::error::TransportError;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Connect(PeripheralHandle),
        Disconnect(PeripheralHandle),
        DiscoverServices(Vec<Uuid>),
        DiscoverCharacteristics(Uuid, Vec<Uuid>),
        Write(Vec<u8>, WriteMode),
        Notify(Uuid, bool),
    }

    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub calls: Vec<Call>,
        pub fail_connect: bool,
    }

    impl RecordingTransport {
        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Write(bytes, _) => Some(bytes.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn connect(&mut self, peripheral: &PeripheralHandle) -> Result<(), TransportError> {
            if self.fail_connect {
                return Err(TransportError::ChannelClosed);
            }
            self.calls.push(Call::Connect(peripheral.clone()));
            Ok(())
        }

        fn disconnect(&mut self, peripheral: &PeripheralHandle) -> Result<(), TransportError> {
            self.calls.push(Call::Disconnect(peripheral.clone()));
            Ok(())
        }

        fn discover_services(
            &mut self,
            _peripheral: &PeripheralHandle,
            services: &[Uuid],
        ) -> Result<(), TransportError> {
            self.calls.push(Call::DiscoverServices(services.to_vec()));
            Ok(())
        }

        fn discover_characteristics(
            &mut self,
            _peripheral: &PeripheralHandle,
            service: Uuid,
            characteristics: &[Uuid],
        ) -> Result<(), TransportError> {
            self.calls
                .push(Call::DiscoverCharacteristics(service, characteristics.to_vec()));
            Ok(())
        }

        fn write_value(
            &mut self,
            _peripheral: &PeripheralHandle,
            _characteristic: Uuid,
            bytes: &[u8],
            mode: WriteMode,
        ) -> Result<(), TransportError> {
            self.calls.push(Call::Write(bytes.to_vec(), mode));
            Ok(())
        }

        fn set_notify(
            &mut self,
            _peripheral: &PeripheralHandle,
            characteristic: Uuid,
            enabled: bool,
        ) -> Result<(), TransportError> {
            self.calls.push(Call::Notify(characteristic, enabled));
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingDisplay {
        pub shown: Vec<(BeaconRole, Reading)>,
    }

    impl DisplaySink for RecordingDisplay {
        fn show(&mut self, role: BeaconRole, reading: Reading) {
            self.shown.push((role, reading));
        }
    }

    type Tracker = LuggageTracker<RecordingTransport, RecordingDisplay>;

    fn config(mode: TransmissionMode) -> TrackerConfig {
        let mut settings = Settings::default();
        settings.transmission_mode = mode;
        settings.tracker_config().unwrap()
    }

    fn tracker(mode: TransmissionMode) -> Tracker {
        LuggageTracker::new(
            &config(mode),
            RecordingTransport::default(),
            RecordingDisplay::default(),
        )
        .unwrap()
    }

    fn controller() -> PeripheralHandle {
        PeripheralHandle::new("controller")
    }

    fn discovered(name: &str, peripheral: &str, rssi: i8) -> AppEvent {
        TransportEvent::DeviceDiscovered {
            peripheral: PeripheralHandle::new(peripheral),
            name: name.to_string(),
            rssi,
        }
        .into()
    }

    fn write_done() -> AppEvent {
        TransportEvent::WriteCompleted {
            peripheral: controller(),
            characteristic: config(TransmissionMode::TimerPaced).write_char_uuid,
            error: None,
        }
        .into()
    }

    /// Walk the link to `CharacteristicReady` and return the ticker control.
    fn make_ready(tracker: &mut Tracker) -> Option<TickerControl> {
        let cfg = config(TransmissionMode::TimerPaced);
        let p = controller();
        tracker.handle_event(discovered("Arduino", "controller", -50));
        tracker.handle_event(TransportEvent::Connected { peripheral: p.clone() }.into());
        tracker.handle_event(
            TransportEvent::ServicesDiscovered {
                peripheral: p.clone(),
                services: vec![cfg.service_uuid],
            }
            .into(),
        );
        tracker.handle_event(
            TransportEvent::CharacteristicsDiscovered {
                peripheral: p,
                service: cfg.service_uuid,
                characteristics: vec![DiscoveredCharacteristic {
                    uuid: cfg.write_char_uuid,
                    properties: CharacteristicProperties {
                        write: true,
                        write_without_response: true,
                        notify: true,
                    },
                }],
            }
            .into(),
        )
    }

    #[test]
    fn test_controller_name_must_differ() {
        let mut cfg = config(TransmissionMode::TimerPaced);
        cfg.filter_period = 0;
        assert!(LuggageTracker::new(
            &cfg,
            RecordingTransport::default(),
            RecordingDisplay::default()
        )
        .is_err());

        let mut cfg = config(TransmissionMode::TimerPaced);
        cfg.controller_name = "?".to_string();
        assert!(LuggageTracker::new(
            &cfg,
            RecordingTransport::default(),
            RecordingDisplay::default()
        )
        .is_err());
    }

    #[test]
    fn test_connection_sequence() {
        let mut tracker = tracker(TransmissionMode::TimerPaced);
        let cfg = config(TransmissionMode::TimerPaced);
        let control = make_ready(&mut tracker);

        assert_eq!(
            control,
            Some(TickerControl::Start {
                epoch: 1,
                interval: Duration::from_millis(500)
            })
        );
        assert_eq!(
            tracker.transport().calls,
            vec![
                Call::Connect(controller()),
                Call::DiscoverServices(vec![cfg.service_uuid]),
                Call::DiscoverCharacteristics(cfg.service_uuid, vec![cfg.write_char_uuid]),
            ]
        );
        assert!(tracker.link().is_write_ready());
    }

    #[test]
    fn test_notifications_when_enabled() {
        let mut cfg = config(TransmissionMode::TimerPaced);
        cfg.subscribe_notifications = true;
        let mut tracker = LuggageTracker::new(
            &cfg,
            RecordingTransport::default(),
            RecordingDisplay::default(),
        )
        .unwrap();
        make_ready(&mut tracker);
        assert!(tracker
            .transport()
            .calls
            .contains(&Call::Notify(cfg.write_char_uuid, true)));
    }

    #[test]
    fn test_beacon_discovery_does_not_touch_link() {
        let mut tracker = tracker(TransmissionMode::EventDriven);
        tracker.handle_event(discovered("BT05", "left", -37));
        tracker.handle_event(discovered("?", "right", -37));
        tracker.handle_event(discovered("Someone", "x", -20));

        assert!(tracker.transport().calls.is_empty());
        assert_eq!(
            tracker.display.shown,
            vec![
                (BeaconRole::Left, Reading { last_raw: 37, average: 37 }),
                (BeaconRole::Right, Reading { last_raw: -37, average: -37 }),
            ]
        );
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.left.map(|r| r.last_raw), Some(37));
    }

    #[test]
    fn test_event_driven_writes_in_sample_order() {
        let mut tracker = tracker(TransmissionMode::EventDriven);
        assert_eq!(make_ready(&mut tracker), None);
        assert!(tracker.scheduler().is_running());

        tracker.handle_event(discovered("?", "right", -60));
        tracker.handle_event(discovered("BT05", "left", -40));
        tracker.handle_event(discovered("?", "right", -62));
        // Only the first write is out until it completes.
        assert_eq!(tracker.transport().writes(), vec![vec![0xC4]]);

        tracker.handle_event(write_done());
        tracker.handle_event(write_done());
        tracker.handle_event(write_done());
        assert_eq!(
            tracker.transport().writes(),
            vec![vec![0xC4], vec![40], vec![0xC3]]
        );
    }

    #[test]
    fn test_samples_before_ready_are_not_written() {
        let mut tracker = tracker(TransmissionMode::EventDriven);
        tracker.handle_event(discovered("BT05", "left", -40));
        make_ready(&mut tracker);
        assert!(tracker.transport().writes().is_empty());

        // The smoothed value is still there for the next sample.
        tracker.handle_event(discovered("BT05", "left", -42));
        assert_eq!(tracker.transport().writes(), vec![vec![41]]);
    }

    #[test]
    fn test_tick_writes_both_beacons_in_order() {
        let mut tracker = tracker(TransmissionMode::TimerPaced);
        make_ready(&mut tracker);
        tracker.handle_event(discovered("?", "right", -70));
        tracker.handle_event(discovered("BT05", "left", -30));
        assert!(tracker.transport().writes().is_empty());

        tracker.handle_event(AppEvent::Tick { epoch: 1 });
        tracker.handle_event(write_done());
        assert_eq!(
            tracker.transport().writes(),
            vec![vec![30], vec![(-70i8) as u8]]
        );
    }

    #[test]
    fn test_tick_skips_unsampled_beacon() {
        let mut tracker = tracker(TransmissionMode::TimerPaced);
        make_ready(&mut tracker);
        tracker.handle_event(AppEvent::Tick { epoch: 1 });
        assert!(tracker.transport().writes().is_empty());

        tracker.handle_event(discovered("?", "right", RSSI_SENTINEL));
        tracker.handle_event(AppEvent::Tick { epoch: 1 });
        assert_eq!(tracker.transport().writes(), vec![vec![(-100i8) as u8]]);
    }

    #[test]
    fn test_disconnect_stops_ticks() {
        let mut tracker = tracker(TransmissionMode::TimerPaced);
        make_ready(&mut tracker);
        tracker.handle_event(discovered("BT05", "left", -30));

        let control = tracker.handle_event(
            TransportEvent::Disconnected {
                peripheral: controller(),
                reason: None,
            }
            .into(),
        );
        assert_eq!(control, Some(TickerControl::Stop));

        // A tick that was already queued produces nothing.
        tracker.handle_event(AppEvent::Tick { epoch: 1 });
        assert!(tracker.transport().writes().is_empty());

        // Rediscovery starts over and gets a fresh ticker epoch.
        let control = make_ready(&mut tracker);
        assert!(matches!(control, Some(TickerControl::Start { epoch: 3, .. })));
        tracker.handle_event(AppEvent::Tick { epoch: 3 });
        assert_eq!(tracker.transport().writes(), vec![vec![30]]);
    }

    #[test]
    fn test_completion_from_dropped_link_keeps_one_in_flight() {
        let mut tracker = tracker(TransmissionMode::EventDriven);
        make_ready(&mut tracker);
        tracker.handle_event(discovered("BT05", "left", -40));
        tracker.handle_event(
            TransportEvent::Disconnected {
                peripheral: controller(),
                reason: None,
            }
            .into(),
        );

        make_ready(&mut tracker);
        tracker.handle_event(discovered("BT05", "left", -42));
        // Completion of the write issued before the disconnect.
        tracker.handle_event(write_done());
        tracker.handle_event(discovered("BT05", "left", -44));
        assert_eq!(tracker.transport().writes().len(), 2);

        tracker.handle_event(write_done());
        assert_eq!(tracker.transport().writes(), vec![vec![40], vec![41], vec![42]]);
    }

    #[test]
    fn test_completion_from_replaced_peripheral_is_not_counted_twice() {
        let mut tracker = tracker(TransmissionMode::EventDriven);
        make_ready(&mut tracker);
        tracker.handle_event(discovered("BT05", "left", -40));
        tracker.handle_event(
            TransportEvent::Disconnected {
                peripheral: controller(),
                reason: None,
            }
            .into(),
        );

        // The controller comes back under a new handle.
        let cfg = config(TransmissionMode::EventDriven);
        let p = PeripheralHandle::new("controller-2");
        tracker.handle_event(discovered("Arduino", "controller-2", -50));
        tracker.handle_event(TransportEvent::Connected { peripheral: p.clone() }.into());
        tracker.handle_event(
            TransportEvent::ServicesDiscovered {
                peripheral: p.clone(),
                services: vec![cfg.service_uuid],
            }
            .into(),
        );
        tracker.handle_event(
            TransportEvent::CharacteristicsDiscovered {
                peripheral: p.clone(),
                service: cfg.service_uuid,
                characteristics: vec![DiscoveredCharacteristic {
                    uuid: cfg.write_char_uuid,
                    properties: CharacteristicProperties {
                        write: true,
                        ..Default::default()
                    },
                }],
            }
            .into(),
        );

        // Late completion for the old handle, then traffic on the new one.
        tracker.handle_event(write_done());
        tracker.handle_event(discovered("BT05", "left", -42));
        tracker.handle_event(discovered("BT05", "left", -44));
        tracker.handle_event(
            TransportEvent::WriteCompleted {
                peripheral: p,
                characteristic: cfg.write_char_uuid,
                error: None,
            }
            .into(),
        );
        assert_eq!(tracker.transport().writes(), vec![vec![40], vec![41], vec![42]]);
    }

    #[test]
    fn test_connect_failure_then_rediscovery() {
        let mut tracker = tracker(TransmissionMode::TimerPaced);
        tracker.handle_event(discovered("Arduino", "controller", -50));
        tracker.handle_event(
            TransportEvent::ConnectFailed {
                peripheral: controller(),
                reason: "timeout".to_string(),
            }
            .into(),
        );
        tracker.handle_event(discovered("Arduino", "controller", -50));
        assert_eq!(
            tracker.transport().calls,
            vec![Call::Connect(controller()), Call::Connect(controller())]
        );
    }

    #[test]
    fn test_unissuable_connect_resets_link() {
        let mut tracker = tracker(TransmissionMode::TimerPaced);
        tracker.transport_mut().fail_connect = true;
        tracker.handle_event(discovered("Arduino", "controller", -50));
        assert!(!tracker.link().is_write_ready());

        tracker.transport_mut().fail_connect = false;
        tracker.handle_event(discovered("Arduino", "controller", -50));
        assert_eq!(tracker.transport().calls, vec![Call::Connect(controller())]);
    }

    #[test]
    fn test_missing_characteristic_disconnects() {
        let mut tracker = tracker(TransmissionMode::TimerPaced);
        let cfg = config(TransmissionMode::TimerPaced);
        let p = controller();
        tracker.handle_event(discovered("Arduino", "controller", -50));
        tracker.handle_event(TransportEvent::Connected { peripheral: p.clone() }.into());
        tracker.handle_event(
            TransportEvent::ServicesDiscovered {
                peripheral: p.clone(),
                services: vec![cfg.service_uuid],
            }
            .into(),
        );
        let control = tracker.handle_event(
            TransportEvent::CharacteristicsDiscovered {
                peripheral: p.clone(),
                service: cfg.service_uuid,
                characteristics: vec![],
            }
            .into(),
        );
        assert_eq!(control, None);
        assert_eq!(tracker.transport().calls.last(), Some(&Call::Disconnect(p)));
        assert!(!tracker.link().is_write_ready());
    }

    #[test]
    fn test_end_to_end_smoothing() {
        let mut tracker = tracker(TransmissionMode::EventDriven);
        make_ready(&mut tracker);
        let samples = [-60, -62, -61, -63, -59, -60, -61, -62, -60, -61, -58];
        for rssi in samples {
            tracker.handle_event(discovered("?", "right", rssi));
            tracker.handle_event(write_done());
        }

        let writes = tracker.transport().writes();
        assert_eq!(writes.len(), samples.len());
        // Mean of the last ten samples, -60.7, as one signed byte.
        assert_eq!(writes.last(), Some(&vec![(-61i8) as u8]));
        assert_eq!(
            tracker.registry().get(BeaconRole::Right).average(),
            Some(-61)
        );
    }
}
