use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use discussion_api::auth::tokens::TokenKeys;
use discussion_api::config::Config;
use discussion_api::db::community::{PgCommunityStore, ReplyStore, TimeoutReplyStore};
use discussion_api::db::users::PgUserDirectory;
use discussion_api::gateway::hub::{Hub, HubHandle};
use discussion_api::AppState;

/// How long shutdown waits for the hub to acknowledge and then to exit.
const HUB_SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally).
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let db = discussion_api::db::pool::connect(&config.database_url).expect("database pool");

    let community = Arc::new(PgCommunityStore::new(db.clone(), 0));
    let replies: Arc<dyn ReplyStore> =
        Arc::new(TimeoutReplyStore::new(community.clone(), config.persist_timeout));

    let (hub, hub_task) = Hub::spawn(replies.clone());

    tracing::info!(
        pong_wait_secs = config.delivery.pong_wait.as_secs(),
        max_message_size = config.delivery.max_message_size,
        outbound_capacity = config.delivery.outbound_capacity,
        "gateway configured"
    );

    let state = AppState {
        tokens: Arc::new(TokenKeys::new(&config.jwt_secret, &config.jwt_issuer)),
        users: Arc::new(PgUserDirectory::new(db)),
        discussions: community,
        replies,
        hub: hub.clone(),
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(discussion_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "discussion-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .expect("server error");

    if tokio::time::timeout(HUB_SHUTDOWN_WAIT, hub_task).await.is_err() {
        tracing::warn!("gateway hub did not stop in time");
    }
}

/// Wait for Ctrl-C, then stop the hub so every live connection gets a close
/// frame before the listener goes away.
async fn shutdown_signal(hub: HubHandle) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    match tokio::time::timeout(HUB_SHUTDOWN_WAIT, hub.shutdown()).await {
        Ok(Ok(closed)) => tracing::info!(closed, "shutting down"),
        Ok(Err(err)) => tracing::warn!(%err, "gateway hub already stopped"),
        Err(_) => tracing::warn!("gateway hub did not acknowledge shutdown in time"),
    }
}
