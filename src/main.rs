//! gps365-sync daemon
//!
//! Polls one 365GPS account and logs every published snapshot until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gps365_sync::config::{AuthMode, Config};
use gps365_sync::models::DeviceField;
use gps365_sync::{Coordinator, Error, Gps365Client, TrackerApi};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gps365_sync=info".into()),
        )
        .init();

    tracing::info!("Starting gps365-sync...");

    let config = Config::load()?;
    tracing::info!("Configuration loaded: {:?}", config.account);

    let credentials = config.account.credentials();
    let account = credentials.masked_username();
    let client = match config.account.auth_mode {
        AuthMode::Token => Gps365Client::with_token(credentials, config.client_options()),
        AuthMode::Session => {
            Gps365Client::with_session(credentials, config.account.demo, config.client_options())
        }
    }
    .context("Failed to build HTTP client")?;
    tracing::info!("Using {} authentication for {}", client.auth_mode(), account);

    let api: Arc<dyn TrackerApi> = Arc::new(client);
    let coordinator = Arc::new(Coordinator::new(api, account, config.polling_options()));

    match coordinator.first_refresh().await {
        Ok(()) => {}
        Err(e) if e.requires_reauth() => {
            anyhow::bail!("Credentials rejected for {}: {}", coordinator.name(), e)
        }
        Err(Error::SetupFailed(e)) => {
            anyhow::bail!("Backend not reachable, retry later: {}", e)
        }
        Err(e) => return Err(e.into()),
    }

    let reporter = Arc::downgrade(&coordinator);
    let _subscription = coordinator.subscribe(move || {
        if let Some(coordinator) = reporter.upgrade() {
            log_snapshot(&coordinator);
        }
    });
    log_snapshot(&coordinator);

    let polling = coordinator.spawn_polling();
    tracing::info!("Background polling started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down...");
    polling.shutdown().await;

    Ok(())
}

fn log_snapshot(coordinator: &Coordinator) {
    let snapshot = coordinator.snapshot();
    let mut imeis: Vec<&String> = snapshot.devices.keys().collect();
    imeis.sort();

    for imei in imeis {
        let Some(device) = snapshot.get(imei) else {
            continue;
        };
        let fields: Vec<String> = DeviceField::ALL
            .iter()
            .map(|field| format!("{}={}", field.key(), field.value(device)))
            .collect();
        tracing::info!(
            "[{}] {} ({:.5}, {:.5}) +/-{}m {}",
            imei,
            device.name,
            device.latitude,
            device.longitude,
            device.location_accuracy(),
            fields.join(" ")
        );
    }
}
