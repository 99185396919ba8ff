use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use vega_exchange::{
    bus::EventBus,
    config::AppConfig,
    engine::router::EngineRouter,
    error::ExchangeResult,
    hub::{Hub, HubConfig},
    server::{self, AppState},
    store::Store,
};

#[tokio::main]
async fn main() -> ExchangeResult<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    let store = Store::connect(&config.database_url, config.max_db_connections).await?;
    store.migrate().await?;

    let (bus, bus_rx) = EventBus::new(config.bus_capacity);
    let hub = Hub::new(HubConfig {
        queue_capacity: config.client_queue_capacity,
        write_timeout: config.ws_write_timeout,
    });
    let router = Arc::new(EngineRouter::new(
        store.clone(),
        bus.clone(),
        config.lock_timeout,
    ));

    let cancel = CancellationToken::new();
    let hub_task = tokio::spawn(hub.clone().run(bus_rx, cancel.clone()));

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let state = AppState {
        router,
        store,
        hub,
        config: config.clone(),
    };
    server::serve(state, &config.bind_addr, cancel).await?;

    let _ = hub_task.await;
    tracing::info!("Shutdown complete");
    Ok(())
}
