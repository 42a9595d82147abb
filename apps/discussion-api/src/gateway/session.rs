//! Turning an upgrade request into a [`Connection`]: credential, identity,
//! user, room. Everything here runs before the upgrade completes, so a
//! failure is an ordinary HTTP error response.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};

use crate::auth::tokens::TokenKeys;
use crate::db::users::UserDirectory;
use crate::error::ApiError;
use crate::models::user::Author;

use super::connection::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapError {
    /// Missing or invalid credential, or the user no longer exists.
    Unauthenticated(&'static str),
    /// The request names no room.
    BadRequest(&'static str),
}

impl IntoResponse for BootstrapError {
    fn into_response(self) -> Response {
        match self {
            BootstrapError::Unauthenticated(message) => ApiError::unauthorized(message),
            BootstrapError::BadRequest(message) => ApiError::bad_request(message),
        }
        .into_response()
    }
}

/// The credential from the `token` query parameter, else from an
/// `Authorization: Bearer` header. Browsers cannot set headers on a
/// WebSocket handshake, hence the query parameter takes precedence.
pub fn extract_credential(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Validate the credential, resolve the user and bind a fresh connection to
/// `room_id`. Nothing is registered with the hub yet.
pub async fn bootstrap(
    tokens: &TokenKeys,
    users: &dyn UserDirectory,
    credential: Option<&str>,
    room_id: &str,
    outbound_capacity: usize,
) -> Result<Connection, BootstrapError> {
    let credential =
        credential.ok_or(BootstrapError::Unauthenticated("Missing authentication token"))?;

    let claims = tokens
        .validate(credential)
        .map_err(|_| BootstrapError::Unauthenticated("Invalid or expired token"))?;

    let user = match users.get_user(&claims.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(BootstrapError::Unauthenticated("User not found")),
        Err(err) => {
            tracing::warn!(user_id = %claims.user_id, %err, "user lookup failed during bootstrap");
            return Err(BootstrapError::Unauthenticated("User lookup failed"));
        }
    };

    if room_id.trim().is_empty() {
        return Err(BootstrapError::BadRequest("Missing discussion ID"));
    }

    Ok(Connection::new(room_id, Author::from(&user), outbound_capacity))
}
