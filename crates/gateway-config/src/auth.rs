// ============================================================================
// Authentication Configuration
// ============================================================================

#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Shared secret for HMAC-signed access tokens. When unset, every
    /// `auth_required` route answers 401.
    pub jwt_secret: Option<String>,
    /// HS256 | HS384 | HS512
    pub jwt_algorithm: String,
    /// Header carrying an API key, used as a rate-limit identity
    pub api_key_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_algorithm: "HS256".to_string(),
            api_key_header: "x-api-key".to_string(),
        }
    }
}

impl AuthConfig {
    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            jwt_secret: std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),
            jwt_algorithm: std::env::var("JWT_ALGORITHM").unwrap_or(defaults.jwt_algorithm),
            api_key_header: std::env::var("API_KEY_HEADER")
                .map(|h| h.to_lowercase())
                .unwrap_or(defaults.api_key_header),
        }
    }
}
