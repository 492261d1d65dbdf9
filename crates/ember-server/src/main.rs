use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use ember_api::auth::{self, AppState, AppStateInner};
use ember_api::middleware::require_auth;
use ember_api::{matches, messages, users};
use ember_gateway::connection;
use ember_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ember=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("EMBER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let bot_token = std::env::var("EMBER_BOT_TOKEN").ok();
    let db_path = std::env::var("EMBER_DB_PATH").unwrap_or_else(|_| "ember.db".into());
    let host = std::env::var("EMBER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("EMBER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    if bot_token.is_none() {
        tracing::warn!("EMBER_BOT_TOKEN not set, Telegram initData will not be verified");
    }

    // Init database
    let db = Arc::new(ember_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher,
        jwt_secret,
        bot_token,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/telegram", post(auth::telegram_login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users/me", get(users::get_me).put(users::update_me))
        .route("/users/me/photos", post(users::add_photo))
        .route("/users/me/photos/{photo_id}/main", put(users::set_main_photo))
        .route("/users/me/photos/{photo_id}", delete(users::delete_photo))
        .route("/users/me/location", put(users::update_location))
        .route("/users/me/settings", put(users::update_settings))
        .route("/users/me/deactivate", put(users::deactivate))
        .route("/users/candidates", get(users::candidates))
        .route("/users/{user_id}", get(users::get_user))
        .route("/matches/swipe", post(matches::swipe))
        .route("/matches", get(matches::list_matches))
        .route("/matches/history/swipes", get(matches::swipe_history))
        .route("/matches/likes/received", get(matches::likes_received))
        .route("/matches/likes/sent", get(matches::likes_sent))
        .route("/matches/stats", get(matches::stats))
        .route(
            "/matches/{user_id}",
            get(matches::match_detail).delete(matches::unmatch),
        )
        .route("/messages/conversations", get(messages::list_conversations))
        .route(
            "/messages/conversation/{user_id}",
            get(messages::get_conversation),
        )
        .route(
            "/messages/conversation/{user_id}/read",
            put(messages::mark_conversation_read),
        )
        .route("/messages/send", post(messages::send_message))
        .route("/messages/unread/count", get(messages::unread_count))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Ember server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
