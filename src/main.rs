use std::{net::SocketAddr, sync::Arc};

use tracing::{error, info};
use valkyrion::{
    audio::HttpResolver,
    common::{
        banner::{BuildInfo, print_banner},
        logger,
        types::AnyResult,
    },
    configs::Config,
    events::BroadcastBus,
    gateway::DiscordConnector,
    http::{self, AppState},
    session::Context,
    storage::JsonStore,
    supervisor::Supervisor,
};

const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Arc::new(Config::load()?);
    logger::init(&config.logging);
    print_banner(&BuildInfo::default());

    let store = Arc::new(JsonStore::open(&config.storage.path).await?);
    let events = BroadcastBus::new(EVENT_BUFFER);
    let resolver = Arc::new(HttpResolver::new()?);
    let ctx = Arc::new(Context::new(
        config.clone(),
        resolver,
        store,
        Arc::new(events.clone()),
    ));

    let connector = Arc::new(DiscordConnector::new(&config.bot)?);
    let supervisor = Supervisor::new(ctx, connector);
    supervisor.start().await?;

    let state = Arc::new(AppState {
        supervisor: supervisor.clone(),
        events,
        config: config.clone(),
    });
    let address: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("HTTP API listening on {}", address);

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
    info!("Shutdown signal received");
}
