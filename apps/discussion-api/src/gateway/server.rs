//! WebSocket upgrade endpoint for discussion rooms.

use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::AppState;

use super::session::{self, BootstrapError};

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/discussions/{id}/ws", get(ws_upgrade))
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Result<Response, BootstrapError> {
    let credential = session::extract_credential(params.token.as_deref(), &headers);
    let policy = state.config.delivery.clone();

    let connection = session::bootstrap(
        &state.tokens,
        state.users.as_ref(),
        credential.as_deref(),
        &room_id,
        policy.outbound_capacity,
    )
    .await
    .inspect_err(|err| tracing::debug!(?err, %room_id, "gateway bootstrap rejected"))?;

    let hub = state.hub.clone();
    Ok(ws
        .max_message_size(policy.transport_message_limit())
        .on_upgrade(move |socket| connection.run(socket, hub, policy)))
}
