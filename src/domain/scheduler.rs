//! Transmission pacing and write backpressure for the controller link.
//!
//! The scheduler never touches the transport. It decides *which* payload goes
//! out next; the tracker issues the write. At most one write is in flight at a
//! time, later ones wait in a FIFO queue until the completion event arrives.

use crate::domain::models::BeaconRole;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionMode {
    /// Push a beacon's payload every time it is sampled.
    #[serde(alias = "event")]
    EventDriven,
    /// Push every beacon's payload on a fixed interval.
    #[serde(alias = "timer")]
    TimerPaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    pub role: BeaconRole,
    pub payload: [u8; 1],
}

/// What the owner of the async runtime has to do after a start or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerControl {
    Start { epoch: u64, interval: Duration },
    Stop,
}

#[derive(Debug)]
pub struct TransmissionScheduler {
    mode: TransmissionMode,
    interval: Duration,
    max_pending: usize,
    running: bool,
    epoch: u64,
    in_flight: Option<PendingWrite>,
    /// Completions still owed by writes forgotten in `reset`.
    orphaned: usize,
    queue: VecDeque<PendingWrite>,
}

impl TransmissionScheduler {
    pub fn new(mode: TransmissionMode, interval: Duration, max_pending: usize) -> Self {
        Self {
            mode,
            interval,
            max_pending: max_pending.max(1),
            running: false,
            epoch: 0,
            in_flight: None,
            orphaned: 0,
            queue: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> TransmissionMode {
        self.mode
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn in_flight(&self) -> Option<PendingWrite> {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Begin accepting writes. A second call while running is a no-op.
    ///
    /// Returns the ticker to spawn in timer-paced mode.
    pub fn start(&mut self) -> Option<TickerControl> {
        if self.running {
            debug!("Scheduler already running");
            return None;
        }
        self.running = true;
        self.epoch += 1;
        match self.mode {
            TransmissionMode::TimerPaced => Some(TickerControl::Start {
                epoch: self.epoch,
                interval: self.interval,
            }),
            TransmissionMode::EventDriven => None,
        }
    }

    /// Stop issuing writes. Safe to call when not running.
    ///
    /// Queued writes are dropped and ticks from the old epoch are rejected from
    /// here on. A write already in flight still gets its completion.
    pub fn stop(&mut self) -> Option<TickerControl> {
        if !self.running {
            return None;
        }
        self.running = false;
        self.epoch += 1;
        if !self.queue.is_empty() {
            debug!("Dropping {} queued writes", self.queue.len());
            self.queue.clear();
        }
        (self.mode == TransmissionMode::TimerPaced).then_some(TickerControl::Stop)
    }

    /// The link is gone. The in-flight write is forgotten, and its completion,
    /// if it still shows up, is swallowed instead of releasing a later write.
    pub fn reset(&mut self) -> Option<TickerControl> {
        let control = self.stop();
        if self.in_flight.take().is_some() {
            self.orphaned += 1;
        }
        control
    }

    /// Forget the in-flight write without issuing the next one.
    pub fn discard_in_flight(&mut self) {
        self.in_flight = None;
    }

    /// A beacon was sampled. Only relevant in event-driven mode.
    pub fn on_sample(&mut self, role: BeaconRole, payload: [u8; 1]) -> Option<PendingWrite> {
        if self.mode != TransmissionMode::EventDriven || !self.running {
            return None;
        }
        self.enqueue(PendingWrite { role, payload });
        self.next_write()
    }

    /// A tick arrived carrying the current payload of every sampled beacon.
    pub fn on_tick(
        &mut self,
        epoch: u64,
        payloads: impl IntoIterator<Item = (BeaconRole, [u8; 1])>,
    ) -> Option<PendingWrite> {
        if !self.accepts_tick(epoch) {
            debug!("Ignoring stale tick (epoch {}, current {})", epoch, self.epoch);
            return None;
        }
        for (role, payload) in payloads {
            self.enqueue(PendingWrite { role, payload });
        }
        self.next_write()
    }

    pub fn accepts_tick(&self, epoch: u64) -> bool {
        self.running && self.mode == TransmissionMode::TimerPaced && epoch == self.epoch
    }

    /// The transport reported a write as finished (successfully or not).
    pub fn on_write_completed(&mut self) -> Option<PendingWrite> {
        if self.orphaned > 0 {
            self.orphaned -= 1;
            debug!("Swallowing completion of a write from a dropped link");
            return None;
        }
        self.release_in_flight()
    }

    /// A completion that can only belong to a dropped link.
    pub fn on_orphan_completed(&mut self) {
        self.orphaned = self.orphaned.saturating_sub(1);
    }

    /// The in-flight write could not be issued, so no completion will come.
    pub fn on_write_not_issued(&mut self) -> Option<PendingWrite> {
        self.release_in_flight()
    }

    fn release_in_flight(&mut self) -> Option<PendingWrite> {
        if self.in_flight.take().is_none() {
            debug!("Write completion without a write in flight");
        }
        if !self.running {
            return None;
        }
        self.next_write()
    }

    fn enqueue(&mut self, write: PendingWrite) {
        if self.queue.len() == self.max_pending {
            if let Some(dropped) = self.queue.pop_front() {
                warn!("Write queue full, dropping oldest {} payload", dropped.role);
            }
        }
        self.queue.push_back(write);
    }

    fn next_write(&mut self) -> Option<PendingWrite> {
        if self.in_flight.is_some() {
            return None;
        }
        let write = self.queue.pop_front()?;
        self.in_flight = Some(write);
        Some(write)
    }
}
