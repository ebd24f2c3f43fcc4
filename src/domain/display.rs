//! Presentation sink for per-beacon readings.

use crate::domain::models::{BeaconRole, Reading, Snapshot};
use tokio::sync::watch;

/// Receives a reading whenever a beacon is sampled. No acknowledgement.
pub trait DisplaySink {
    fn show(&mut self, role: BeaconRole, reading: Reading);
}

/// Publishes copies of the latest readings on a `watch` channel.
///
/// Readers on the presentation side only ever see owned [`Snapshot`] values.
pub struct SnapshotDisplay {
    sender: watch::Sender<Snapshot>,
}

impl SnapshotDisplay {
    pub fn new() -> (Self, watch::Receiver<Snapshot>) {
        let (sender, receiver) = watch::channel(Snapshot::default());
        (Self { sender }, receiver)
    }
}

impl DisplaySink for SnapshotDisplay {
    fn show(&mut self, role: BeaconRole, reading: Reading) {
        // No receivers is fine; the value is still stored for late subscribers.
        self.sender.send_modify(|snapshot| snapshot.set(role, reading));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_updates() {
        let (mut display, receiver) = SnapshotDisplay::new();
        display.show(
            BeaconRole::Left,
            Reading {
                last_raw: 40,
                average: 42,
            },
        );

        let snapshot = *receiver.borrow();
        assert_eq!(snapshot.get(BeaconRole::Left).map(|r| r.average), Some(42));
        assert_eq!(snapshot.get(BeaconRole::Right), None);
    }
}
