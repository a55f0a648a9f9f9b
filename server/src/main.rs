use axum::{
    routing::{get, post},
    Router,
};
use game_manager::AppState;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use ws::ws_handler;

mod accounts;
mod engine;
mod error;
mod game_manager;
mod ws;

struct Config {
    port: u16,
    static_dir: PathBuf,
    accounts_path: PathBuf,
    engine_bin: String,
}

impl Config {
    fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            static_dir: std::env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static")),
            accounts_path: std::env::var("ACCOUNTS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("accounts.json")),
            engine_bin: std::env::var("CHESS_ENGINE_BIN").unwrap_or_else(|_| "stockfish".into()),
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let state = Arc::new(AppState::new(
        accounts::AccountStore::new(Some(config.accounts_path.clone())),
        engine::EngineService::new(config.engine_bin.clone()),
    ));
    Arc::clone(&state).spawn_cleanup_task();

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/accounts", post(accounts::create))
        .route("/api/login", post(accounts::login))
        .route("/api/stats/:username", get(accounts::stats))
        .route("/api/leaderboard", get(accounts::leaderboard))
        .route("/api/engine/move", post(engine::suggest))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, static_dir = %config.static_dir.display(), "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
