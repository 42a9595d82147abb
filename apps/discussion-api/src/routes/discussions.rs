//! Discussion and reply endpoints. Replies posted here are also pushed to
//! the discussion's live room.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::models::discussion::{Discussion, DiscussionDraft, DiscussionView};
use crate::models::reply::{NewReply, ReplyView};
use crate::models::user::Author;
use crate::AppState;

/// Longest accepted discussion or reply body, in characters.
pub const MAX_BODY_CHARS: usize = 4000;
/// Longest accepted discussion title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/discussions",
            get(list_discussions).post(create_discussion),
        )
        .route(
            "/v1/discussions/{id}/replies",
            get(list_replies).post(create_reply),
        )
}

fn validate_body(field: &str, body: Option<&str>, errors: &mut Vec<FieldError>) {
    match body.map(str::trim) {
        None | Some("") => errors.push(FieldError::new(field, format!("{field} is required"))),
        Some(b) if b.chars().count() > MAX_BODY_CHARS => errors.push(FieldError::new(
            field,
            format!("{field} must be {MAX_BODY_CHARS} characters or fewer"),
        )),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// GET /v1/discussions?type=&id=
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListDiscussionsParams {
    #[serde(rename = "type")]
    pub context_type: Option<String>,
    #[serde(rename = "id")]
    pub context_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListDiscussionsResponse {
    pub discussions: Vec<DiscussionView>,
}

#[utoipa::path(
    get,
    path = "/v1/discussions",
    tag = "Discussions",
    params(
        ("type" = String, Query, description = "Context type, e.g. `lesson` or `course`"),
        ("id" = String, Query, description = "Context ID"),
    ),
    responses(
        (status = 200, description = "Discussions, most recently active first", body = ListDiscussionsResponse),
        (status = 400, description = "Missing context", body = ApiErrorBody),
    ),
)]
pub async fn list_discussions(
    State(state): State<AppState>,
    Query(params): Query<ListDiscussionsParams>,
) -> Result<Json<ListDiscussionsResponse>, ApiError> {
    let context_type = params.context_type.filter(|s| !s.is_empty());
    let context_id = params.context_id.filter(|s| !s.is_empty());
    let (Some(context_type), Some(context_id)) = (context_type, context_id) else {
        return Err(ApiError::bad_request("type and id query parameters are required"));
    };

    let discussions = state
        .discussions
        .list_for_context(&context_type, &context_id)
        .await?;

    Ok(Json(ListDiscussionsResponse { discussions }))
}

// ---------------------------------------------------------------------------
// POST /v1/discussions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDiscussionRequest {
    pub context_type: Option<String>,
    pub context_id: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DiscussionResponse {
    pub discussion: Discussion,
}

#[utoipa::path(
    post,
    path = "/v1/discussions",
    tag = "Discussions",
    security(("bearer" = [])),
    request_body = CreateDiscussionRequest,
    responses(
        (status = 201, description = "Discussion created", body = DiscussionResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn create_discussion(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateDiscussionRequest>,
) -> Result<(StatusCode, Json<DiscussionResponse>), ApiError> {
    let mut errors = Vec::new();
    for (field, value) in [("context_type", &req.context_type), ("context_id", &req.context_id)] {
        if value.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            errors.push(FieldError::new(field, format!("{field} is required")));
        }
    }
    validate_body("body", req.body.as_deref(), &mut errors);
    let title = req
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if title.is_some_and(|t| t.chars().count() > MAX_TITLE_CHARS) {
        errors.push(FieldError::new(
            "title",
            format!("title must be {MAX_TITLE_CHARS} characters or fewer"),
        ));
    }
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let draft = DiscussionDraft {
        user_id,
        context_type: req.context_type.unwrap_or_default().trim().to_string(),
        context_id: req.context_id.unwrap_or_default().trim().to_string(),
        title: title.map(str::to_string),
        body: req.body.unwrap_or_default().trim().to_string(),
    };
    let discussion = state.discussions.create_discussion(&draft).await?;

    tracing::info!(
        discussion_id = %discussion.id,
        context_type = %discussion.context_type,
        context_id = %discussion.context_id,
        "discussion created"
    );

    Ok((StatusCode::CREATED, Json(DiscussionResponse { discussion })))
}

// ---------------------------------------------------------------------------
// GET /v1/discussions/{id}/replies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct ListRepliesResponse {
    pub replies: Vec<ReplyView>,
}

#[utoipa::path(
    get,
    path = "/v1/discussions/{id}/replies",
    tag = "Discussions",
    params(("id" = String, Path, description = "Discussion ID")),
    responses(
        (status = 200, description = "Replies, oldest first", body = ListRepliesResponse),
        (status = 404, description = "Discussion not found", body = ApiErrorBody),
    ),
)]
pub async fn list_replies(
    State(state): State<AppState>,
    Path(discussion_id): Path<String>,
) -> Result<Json<ListRepliesResponse>, ApiError> {
    state
        .discussions
        .get_discussion(&discussion_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Discussion not found"))?;

    let replies = state.discussions.list_replies(&discussion_id).await?;

    Ok(Json(ListRepliesResponse { replies }))
}

// ---------------------------------------------------------------------------
// POST /v1/discussions/{id}/replies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReplyRequest {
    pub body: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReplyResponse {
    pub reply: ReplyView,
}

#[utoipa::path(
    post,
    path = "/v1/discussions/{id}/replies",
    tag = "Discussions",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Discussion ID")),
    request_body = CreateReplyRequest,
    responses(
        (status = 201, description = "Reply created and delivered to live members", body = ReplyResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Discussion not found", body = ApiErrorBody),
    ),
)]
pub async fn create_reply(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(discussion_id): Path<String>,
    Json(req): Json<CreateReplyRequest>,
) -> Result<(StatusCode, Json<ReplyResponse>), ApiError> {
    let mut errors = Vec::new();
    validate_body("body", req.body.as_deref(), &mut errors);
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let user = state
        .users
        .get_user(&user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;
    let author = Author::from(&user);

    let reply = state
        .replies
        .create_reply(&NewReply {
            discussion_id,
            user_id,
            body: req.body.unwrap_or_default().trim().to_string(),
        })
        .await?;
    let view = ReplyView::new(reply, &author);

    if let Err(err) = state.hub.deliver(view.clone()).await {
        tracing::warn!(reply_id = view.reply.id, %err, "reply saved but not delivered live");
    }

    Ok((StatusCode::CREATED, Json(ReplyResponse { reply: view })))
}
