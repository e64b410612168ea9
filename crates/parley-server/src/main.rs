use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_core::ChatService;
use parley_gateway::ConnectionRegistry;
use parley_gateway::connection;
use parley_presence::memory::MemoryStore;
use parley_presence::redis::RedisStore;
use parley_presence::{FocusTracker, KeyedStore, PresenceRegistry};

#[derive(Clone)]
struct ServerState {
    registry: ConnectionRegistry,
    service: ChatService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let redis_url = std::env::var("PARLEY_REDIS_URL").ok();

    // Durable store
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared ephemeral store: redis when configured, otherwise process-local
    let store: Arc<dyn KeyedStore> = match redis_url {
        Some(url) => {
            info!("Presence backed by redis");
            Arc::new(RedisStore::connect(&url).await?)
        }
        None => {
            warn!(
                "PARLEY_REDIS_URL not set; presence held in process memory \
                 (valid for single-instance deployments only)"
            );
            Arc::new(MemoryStore::new())
        }
    };

    let presence = PresenceRegistry::new(store.clone());
    let focus = FocusTracker::new(store);
    let registry = ConnectionRegistry::new();
    let service = ChatService::new(db, presence, focus, Arc::new(registry.clone()));

    let state = ServerState { registry, service };

    // Routes
    let app = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state.registry, state.service))
}

async fn health() -> &'static str {
    "parley"
}
