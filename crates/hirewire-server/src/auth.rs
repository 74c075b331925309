//! Bearer credential verification.
//!
//! Tokens are issued by the external auth service; this module only
//! verifies them. The same [`CredentialVerifier`] backs the REST extractor
//! and the live-transport handshake.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hirewire_shared::{UserId, UserKind};

use crate::api::AppState;
use crate::error::ServerError;

/// Who a verified credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub kind: UserKind,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,

    #[error("Invalid authorization format")]
    MalformedHeader,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    Invalid,
}

/// Token claims as issued by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "_id")]
    pub user_id: String,
    #[serde(rename = "userType")]
    pub user_type: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

/// Verifies a bearer credential and resolves it to an [`Identity`].
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT verifier.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            }
        })?;

        let claims = data.claims;
        let user_id = UserId::parse_optional(Some(claims.user_id.as_str())).ok_or(AuthError::Invalid)?;
        let kind = UserKind::parse(&claims.user_type).ok_or(AuthError::Invalid)?;

        Ok(Identity { user_id, kind })
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::MalformedHeader),
    }
}

/// Authenticated caller of a REST handler.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let identity = state.verifier.verify(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected REST credential");
            e
        })?;
        Ok(AuthUser(identity))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::Claims;

    pub const SECRET: &str = "test-secret";

    pub fn token_with_exp(user_id: &str, user_type: &str, exp: u64) -> String {
        let claims = Claims {
            user_id: user_id.to_string(),
            user_type: user_type.to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    pub fn token(user_id: &str, user_type: &str) -> String {
        let exp = chrono::Utc::now().timestamp() as u64 + 3600;
        token_with_exp(user_id, user_type, exp)
    }
}
