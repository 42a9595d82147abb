//! HS256 bearer credentials shared with the main Iqraa API.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Issuer stamped into credentials by the main API.
pub const DEFAULT_ISSUER: &str = "iqraa-api";

/// Lifetime of a freshly issued credential, in hours.
pub const TOKEN_TTL_HOURS: i64 = 24;

/// Claims carried by a bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signing and verification keys for bearer credentials.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    validation: Validation,
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenKeys {
    pub fn new(secret: &str, issuer: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            validation,
        }
    }

    /// Mint a credential for `user_id` valid for [`TOKEN_TTL_HOURS`].
    pub fn issue(&self, user_id: &str) -> Result<String, ApiError> {
        self.issue_with_ttl(user_id, Duration::hours(TOKEN_TTL_HOURS))
    }

    /// Mint a credential with an explicit lifetime. A negative `ttl` yields an
    /// already-expired credential.
    pub fn issue_with_ttl(&self, user_id: &str, ttl: Duration) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            user_id: user_id.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(
            |err| {
                tracing::error!(?err, "failed to sign credential");
                ApiError::internal("Failed to issue token")
            },
        )
    }

    /// Check signature, expiry and issuer, returning the claims on success.
    pub fn validate(&self, token: &str) -> Result<Claims, ApiError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| {
                tracing::debug!(%err, "credential rejected");
                ApiError::unauthorized("Invalid or expired token")
            })?;

        if data.claims.user_id.is_empty() {
            return Err(ApiError::unauthorized("Token has no subject"));
        }

        Ok(data.claims)
    }
}
