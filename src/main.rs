use events::EventPublisher;
use log::{error, info};
use realtime::{Hub, RealtimeEventHandler};
use service::{config::Config, logging::Logger};
use std::sync::Arc;
use web::AppState;

#[tokio::main]
async fn main() {
    let config = Arc::new(Config::new());
    Logger::init_logger(&config);

    let hub = Arc::new(Hub::new());
    let event_publisher =
        EventPublisher::new().with_handler(Arc::new(RealtimeEventHandler::new(hub.clone())));

    let host = config
        .interface
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = config.port;

    let state = AppState::new(config, hub, event_publisher);
    let router = web::router::init_router(state);

    let listener = match tokio::net::TcpListener::bind(format!("{host}:{port}")).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {host}:{port}: {e}");
            std::process::exit(1);
        }
    };

    info!("Realtime gateway listening on {host}:{port}");

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}
