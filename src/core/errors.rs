use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Error object reported by the exchange, either over the socket or as a
    /// REST response body.
    #[error("API error {code}: {message}{}", action_suffix(.action))]
    ApiError {
        code: i64,
        message: String,
        action: Option<String>,
    },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("received auth event from server, but was not authenticated")]
    NotAuthenticated,

    #[error("no subscriptions yet, start listening first")]
    NoSubscriptions,

    #[error("expected channel '{0}' in subscribed event")]
    UnexpectedChannel(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),
}

#[allow(clippy::ref_option)]
fn action_suffix(action: &Option<String>) -> String {
    action
        .as_deref()
        .map_or_else(String::new, |action| format!(" action: {}", action))
}

impl ExchangeError {
    /// True for errors produced while turning an inbound frame into a value.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::JsonError(_) | Self::DecodeError(_))
    }
}
