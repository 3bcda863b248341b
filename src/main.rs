use std::sync::Arc;

use tower_http::cors::CorsLayer;

use club_ratings::calendar::SystemClock;
use club_ratings::config::Config;
use club_ratings::notify::LogNotifier;
use club_ratings::store::{MemoryStore, SqliteStore, Store};
use club_ratings::{api, metrics, Engine};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    let store: Arc<dyn Store> = if config.local_mode {
        tracing::info!("Local mode: using in-memory store, nothing is persisted");
        Arc::new(MemoryStore::new())
    } else {
        let store = SqliteStore::new(&config.database_url)
            .await
            .expect("Failed to initialize database");
        Arc::new(store)
    };

    let engine = Engine::new(
        store,
        Arc::new(SystemClock),
        Arc::new(LogNotifier),
        config.engine.clone(),
    );

    let app = api::router(engine, config.operation_timeout).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(
        port = config.port,
        k_policy = ?config.engine.k_policy,
        "Club ratings engine listening"
    );
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
