use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use venue_core::DEFAULT_ROOM_ID;
use venue_host::advertise::{MdnsAdvertiser, ServiceAdvertiser};
use venue_host::config::HostConfig;
use venue_host::library::{HostLibrary, StaticHostLibrary};
use venue_host::{AppState, build_router, liveness};

/// Clock/IdGen are implicit in `venue_core::now_ms` and `short_id`, so the
/// process-level startup sequence starts at the registry.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = HostConfig::parse();

    let library: Arc<dyn HostLibrary> = Arc::new(StaticHostLibrary::new(
        DEFAULT_ROOM_ID.to_owned(),
        config.room_name.clone(),
    ));

    // RoomRegistry, TransferEngine and Dispatcher are all constructed inside
    // AppState::new, in that order.
    let state = AppState::new(&config, library);

    let listener = match TcpListener::bind(config.listen_address()).await {
        Ok(listener) => listener,
        Err(source) => {
            error!("failed to bind {}: {}", config.listen_address(), source);
            return ExitCode::FAILURE;
        }
    };

    let liveness_task = tokio::spawn(liveness::run(
        Arc::clone(&state.registry),
        Arc::clone(&state.transfers),
        Arc::clone(&state.dispatcher),
    ));

    let advertiser: Arc<dyn ServiceAdvertiser> = Arc::new(MdnsAdvertiser::new(
        config.service_name.clone(),
        config.room_name.clone(),
    ));
    if let Err(err) = advertiser.start(config.port) {
        error!("failed to start service advertiser: {}", err);
        liveness_task.abort();
        return ExitCode::FAILURE;
    }

    let shutdown_advertiser = Arc::clone(&advertiser);
    let server =
        axum::serve(listener, build_router(state)).with_graceful_shutdown(shutdown_signal(shutdown_advertiser));

    if let Err(err) = server.await {
        error!("server error: {}", err);
    }

    liveness_task.abort();
    info!("venue host shut down cleanly");
    ExitCode::SUCCESS
}

/// Resolves once SIGINT/ctrl-c arrives. Stops the advertiser immediately so
/// no new peer discovers the host while `axum::serve` drains the
/// connections already accepted: advertising stops before new endpoints
/// stop being accepted.
async fn shutdown_signal(advertiser: Arc<dyn ServiceAdvertiser>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, stopping service advertiser");
    advertiser.stop();
}
