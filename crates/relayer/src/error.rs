use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayerError>;

const MAX_ERROR_LEN: usize = 300;

#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("{0}")]
    Validation(String),

    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("Failed to send transaction: {0}")]
    Submission(String),

    #[error("Chain error: {0}")]
    Chain(String),
}

impl IntoResponse for RelayerError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayerError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayerError::Simulation(_) => StatusCode::BAD_REQUEST,
            RelayerError::Submission(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayerError::Chain(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Scrubs node URLs and key material out of upstream error text before it
/// reaches a caller, and bounds its length.
#[derive(Clone, Debug, Default)]
pub struct Sanitizer {
    redactions: Vec<String>,
}

impl Sanitizer {
    pub fn new(redactions: Vec<String>) -> Self {
        let mut redactions: Vec<String> = redactions.into_iter().filter(|r| !r.is_empty()).collect();
        // Longest first so a key is not half-replaced by its unprefixed form.
        redactions.sort_by_key(|r| std::cmp::Reverse(r.len()));
        Self { redactions }
    }

    pub fn clean(&self, message: &str) -> String {
        let mut cleaned = message.to_string();
        for secret in &self.redactions {
            cleaned = cleaned.replace(secret.as_str(), "[redacted]");
        }
        if cleaned.chars().count() > MAX_ERROR_LEN {
            cleaned = cleaned.chars().take(MAX_ERROR_LEN).collect::<String>() + "...";
        }
        cleaned
    }
}
