// ============================================================================
// Authentication - access token verification at the trust boundary
// ============================================================================
//
// The gateway only verifies tokens; issuing them is the auth service's job.
// A verified identity becomes the rate-limit key and the source of the
// trust headers (X-User-Id, X-Roles, ...) forwarded to backends.
//
// ============================================================================

use anyhow::{Result, bail};
use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::GatewayError;

/// Verified caller identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: Option<String>,
    pub tenant_id: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => GatewayError::unauthorized("missing bearer token"),
            AuthError::InvalidCredentials(msg) => GatewayError::unauthorized(msg),
            AuthError::Forbidden(msg) => GatewayError::forbidden(msg),
        }
    }
}

/// Turns request credentials into a verified identity
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError>;
}

/// Access token claims understood by the gateway
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// HMAC-signed bearer token verification
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str, algorithm: &str) -> Result<Self> {
        if secret.trim().is_empty() {
            bail!("JWT secret must not be empty");
        }
        let algorithm = match algorithm.to_uppercase().as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => bail!("unsupported JWT algorithm '{}' (expected HS256/HS384/HS512)", other),
        };

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(algorithm),
        })
    }

    /// Build from config; `None` when no secret is configured
    pub fn from_config(config: &AuthConfig) -> Result<Option<Self>> {
        match &config.jwt_secret {
            Some(secret) => Ok(Some(Self::new(secret, &config.jwt_algorithm)?)),
            None => Ok(None),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidCredentials(format!("invalid token: {}", e)))
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = bearer_token(headers)?;
        let claims = self.verify(token)?;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidCredentials("token has no subject".to_string()));
        }

        Ok(Identity {
            user_id: claims.sub,
            username: claims.username,
            tenant_id: claims.tenant_id,
            roles: claims.roles,
            permissions: claims.permissions,
        })
    }
}

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingCredentials)?
        .to_str()
        .map_err(|_| AuthError::InvalidCredentials("malformed Authorization header".into()))?;

    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or_else(|| AuthError::InvalidCredentials("expected Bearer scheme".into()))?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    Ok(token)
}
