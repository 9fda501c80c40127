//! Audio Proxy Service
//!
//! Brokers streaming audio and control messages between many client
//! sessions and a single AI backend socket, over two independent
//! websocket endpoints (`/proxy`, `/call`) plus an admin JSON surface.

use audio_proxy::{build_router, AppState, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let bind_addr = config.bind_addr;
    let state = AppState::new(config);
    let router = build_router(state);

    tracing::info!(%bind_addr, "audio proxy listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
