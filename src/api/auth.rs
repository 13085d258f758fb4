//! Bearer JWT verification.
//!
//! Tokens are issued elsewhere; this side only checks the signature and
//! expiry and takes the `sub` claim as the username attached to events.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use super::error::ApiError;
use super::AppState;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing or malformed Authorization header")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Claims read from an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The authenticated caller, available to handlers as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub username: String,
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Build a verifier for an HMAC secret.
    pub fn new(secret: &str, algorithm: &str) -> Result<Self, AuthError> {
        let algorithm = Algorithm::from_str(algorithm)
            .map_err(|_| AuthError::UnsupportedAlgorithm(algorithm.to_string()))?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::UnsupportedAlgorithm(format!("{algorithm:?}")));
        }

        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(algorithm),
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }
        Ok(data.claims)
    }
}

fn bearer_token(req: &Request) -> Result<&str, AuthError> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Reject requests without a valid token; expose the caller to handlers
/// (request extension) and to the error logger (response extension).
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = bearer_token(&req)
        .and_then(|token| state.verifier.verify(token))
        .map_err(|e| {
            warn!(path = %req.uri().path(), error = %e, "Rejected request");
            ApiError::Unauthorized("Invalid credentials".to_string())
        })?;

    let user = AuthUser {
        username: claims.sub,
    };
    req.extensions_mut().insert(user.clone());

    let mut response = next.run(req).await;
    response.extensions_mut().insert(user);
    Ok(response)
}
