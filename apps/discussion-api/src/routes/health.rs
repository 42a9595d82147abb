use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/health", get(health))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub gateway: GatewayHealth,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GatewayHealth {
    pub running: bool,
    pub connections: usize,
    pub rooms: usize,
}

#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    ),
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let gateway = match state.hub.snapshot().await {
        Ok(snapshot) => GatewayHealth {
            running: true,
            connections: snapshot.connections,
            rooms: snapshot.rooms.len(),
        },
        Err(_) => GatewayHealth {
            running: false,
            connections: 0,
            rooms: 0,
        },
    };

    Json(HealthResponse {
        status: "available",
        gateway,
    })
}
