use lazy_luggage::app::App;
use lazy_luggage::domain::display::SnapshotDisplay;
use lazy_luggage::domain::models::{BeaconRole, Snapshot};
use lazy_luggage::domain::settings::SettingsService;
use lazy_luggage::domain::tracker::LuggageTracker;
use lazy_luggage::infrastructure::bluetooth::{self, BluetoothService};
use lazy_luggage::infrastructure::logging;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting LazyLuggage");
    info!("Settings loaded from {}", settings_service.path().display());

    let config = settings.tracker_config().map_err(|e| {
        error!("{}", e);
        e
    })?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (transport, commands) = bluetooth::channel();

    let service = BluetoothService::new(events_tx.clone()).await?;
    tokio::spawn(async move {
        if let Err(e) = service.run(commands).await {
            error!("Bluetooth service stopped: {}", e);
        }
    });

    let (display, snapshots) = SnapshotDisplay::new();
    tokio::spawn(present(snapshots));

    let tracker = LuggageTracker::new(&config, transport, display)?;
    App::new(tracker, events_tx, events_rx)
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Shutting down");
    Ok(())
}

/// Log every change of the displayed readings.
async fn present(mut snapshots: watch::Receiver<Snapshot>) {
    while snapshots.changed().await.is_ok() {
        let snapshot = *snapshots.borrow_and_update();
        for role in BeaconRole::ALL {
            if let Some(reading) = snapshot.get(role) {
                info!(
                    "{:>5}: last {:>4}  avg {:>4}",
                    role.label(),
                    reading.last_raw,
                    reading.average
                );
            }
        }
    }
}
