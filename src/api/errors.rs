//! Librarian API error types
//!
//! Structured errors for backend API operations. Variants are mapped from
//! HTTP status codes and transport failures before being flattened into
//! the response envelope the rest of the application sees.

/// Errors produced while talking to the librarian backend
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Request error: {0}")]
    Request(String),
}

impl ApiError {
    /// Create an ApiError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            404 => ApiError::NotFound(body.to_string()),
            408 => ApiError::Timeout,
            500..=599 => ApiError::Server(status, body.to_string()),
            _ => ApiError::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if e.is_connect() {
            ApiError::Network(e.to_string())
        } else {
            ApiError::Request(e.to_string())
        }
    }
}
