pub mod discussions;
pub mod health;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(discussions::router())
        .merge(crate::gateway::server::router())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        discussions::list_discussions,
        discussions::create_discussion,
        discussions::list_replies,
        discussions::create_reply,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            crate::models::discussion::Discussion,
            crate::models::discussion::DiscussionView,
            crate::models::reply::Reply,
            crate::models::reply::ReplyView,
            health::HealthResponse,
            health::GatewayHealth,
            discussions::ListDiscussionsResponse,
            discussions::CreateDiscussionRequest,
            discussions::DiscussionResponse,
            discussions::ListRepliesResponse,
            discussions::CreateReplyRequest,
            discussions::ReplyResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Discussions", description = "Discussion threads and replies"),
    )
)]
pub struct ApiDoc;
