use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::{AppState, AppStateInner, conversations, messages, users};
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;

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
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "5000".into())
        .parse()?;
    let echo_to_sender: bool = std::env::var("PARLEY_ECHO_TO_SENDER")
        .unwrap_or_else(|_| "true".into())
        .parse()?;

    // Init database, seed demo data on first run
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);
    parley_db::seed::run(&db)?;

    // Shared state
    let dispatcher = Dispatcher::new(echo_to_sender);
    let state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher,
    });

    let app = Router::new()
        .route("/", get(health))
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages),
        )
        .route(
            "/conversations/{conversation_id}/read",
            post(conversations::mark_read),
        )
        .route(
            "/conversations/{conversation_id}/members",
            get(conversations::get_members),
        )
        .route("/messages", post(messages::send_message))
        .route("/users/{user_id}", get(users::get_user))
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "Chat API running!",
        "features": ["Multi-user", "Groups", "Read receipts"],
    }))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher.clone(), state.db.clone())
    })
}
