//! Event loop driving the tracker.
//!
//! Transport events and ticks arrive on one channel and are handled strictly
//! one at a time, so the tracker never needs a lock.

use crate::domain::display::DisplaySink;
use crate::domain::models::AppEvent;
use crate::domain::scheduler::TickerControl;
use crate::domain::tracker::LuggageTracker;
use crate::domain::transport::Transport;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

pub struct App<T, D> {
    tracker: LuggageTracker<T, D>,
    events_tx: mpsc::UnboundedSender<AppEvent>,
    events_rx: mpsc::UnboundedReceiver<AppEvent>,
    ticker: Option<JoinHandle<()>>,
}

impl<T: Transport, D: DisplaySink> App<T, D> {
    /// `events_tx` must feed `events_rx`; ticks are sent through it.
    pub fn new(
        tracker: LuggageTracker<T, D>,
        events_tx: mpsc::UnboundedSender<AppEvent>,
        events_rx: mpsc::UnboundedReceiver<AppEvent>,
    ) -> Self {
        Self {
            tracker,
            events_tx,
            events_rx,
            ticker: None,
        }
    }

    pub fn tracker(&self) -> &LuggageTracker<T, D> {
        &self.tracker
    }

    /// Process events until `shutdown` resolves. The ticker is stopped on return.
    pub async fn run_until<F: Future>(mut self, shutdown: F) -> Self {
        tokio::pin!(shutdown);
        info!("Event loop started");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                event = self.events_rx.recv() => {
                    let Some(event) = event else { break };
                    if let Some(control) = self.tracker.handle_event(event) {
                        self.apply(control);
                    }
                }
            }
        }

        self.stop_ticker();
        info!("Event loop stopped");
        self
    }

    fn apply(&mut self, control: TickerControl) {
        match control {
            TickerControl::Start { epoch, interval } => {
                self.stop_ticker();
                debug!("Ticker epoch {} every {:?}", epoch, interval);
                self.ticker = Some(spawn_ticker(self.events_tx.clone(), epoch, interval));
            }
            TickerControl::Stop => self.stop_ticker(),
        }
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// Emit `Tick { epoch }` every `interval`, first one after a full interval.
pub fn spawn_ticker(
    events: mpsc::UnboundedSender<AppEvent>,
    epoch: u64,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if events.send(AppEvent::Tick { epoch }).is_err() {
                break;
            }
        }
    })
}
