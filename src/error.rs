use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("bot has no declared type: {0}")]
    UndeclaredBotType(String),

    #[error("invalid bot configuration: {0}")]
    Config(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("upstream error from {platform}: HTTP {status}")]
    Upstream { platform: String, status: u16 },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Returns true for transport failures that the retry loop may try again.
    /// Any non-200 status counts, not only 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Upstream { .. } => true,
            Self::Request(_) => true,
            _ => false,
        }
    }

    /// Produce a sanitized message safe for stream error handlers and MCP clients.
    /// Does not leak internal URLs, connection details, or upstream bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::UnsupportedPlatform(platform) => format!("unsupported bot platform: {platform}"),
            Self::UndeclaredBotType(name) => format!("bot has no declared type: {name}"),
            Self::Config(_) => "bot is not configured correctly".to_string(),
            Self::Timeout(ms) => format!("bot request timed out after {ms}ms"),
            Self::Cancelled => "bot request was cancelled".to_string(),
            Self::Upstream { platform, status } => {
                format!("bot backend {platform} answered with HTTP {status}")
            }
            Self::Request(_) => "request to bot backend failed".to_string(),
            Self::SchemaParse(_) => "failed to parse bot response".to_string(),
            Self::Other(msg) => msg.clone(),
        }
    }
}
