//! Binary entrypoint for the CBAM emission server.
//!
//! Reads configuration from environment variables:
//! - `CBAM_DB_PATH`: SQLite database file path (default: "cbam.db")
//! - `CBAM_PORT`: Server listen port (default: "3000")
//! - `CBAM_LOCK_TTL_SECS`: graph run lock TTL in seconds (default: 300)

use std::process;
use std::time::Duration;

use cbam_server::router::build_router;
use cbam_server::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let db_path = std::env::var("CBAM_DB_PATH").unwrap_or_else(|_| "cbam.db".to_string());
    let port = std::env::var("CBAM_PORT").unwrap_or_else(|_| "3000".to_string());
    let lock_ttl = match std::env::var("CBAM_LOCK_TTL_SECS") {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(e) => {
                tracing::error!("invalid CBAM_LOCK_TTL_SECS '{}': {}", raw, e);
                process::exit(2);
            }
        },
        Err(_) => Duration::from_secs(300),
    };

    let state = match AppState::new(&db_path, lock_ttl) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("failed to initialize application state: {}", e);
            process::exit(1);
        }
    };

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!(db = %db_path, "cbam server starting on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {}: {}", addr, e);
            process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {}", e);
        process::exit(1);
    }
}
