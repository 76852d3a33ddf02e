// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of the human-readable format (LOG_FORMAT=json)
    pub json: bool,
}

impl LoggingConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }
}
