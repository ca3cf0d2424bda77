//! Error types for the REST API client

use dai_client_api::ClientApiError;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when using the REST API client
#[derive(Debug, Error)]
pub enum RestClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("API contract error: {0}")]
    ApiContract(#[from] dai_api_contract::ApiContractError),

    #[error("Server returned error status {status}: {message}")]
    ServerError { status: StatusCode, message: String },

    #[error("SSE stream error: {0}")]
    Sse(String),
}

/// Result type alias for REST client operations
pub type RestClientResult<T> = Result<T, RestClientError>;

impl From<RestClientError> for ClientApiError {
    fn from(error: RestClientError) -> Self {
        match error {
            RestClientError::ServerError { message, .. } => ClientApiError::Server(message),
            RestClientError::Http(e) if e.is_decode() => ClientApiError::Unexpected(e.to_string()),
            RestClientError::Http(e) => ClientApiError::Transport(e.to_string()),
            RestClientError::Sse(message) => ClientApiError::Transport(message),
            RestClientError::Json(e) => ClientApiError::Unexpected(e.to_string()),
            RestClientError::Url(e) => ClientApiError::InvalidRequest(e.to_string()),
            RestClientError::ApiContract(e) => ClientApiError::InvalidRequest(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_keeps_only_message() {
        let error = RestClientError::ServerError {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "rate limited".to_string(),
        };
        assert_eq!(
            ClientApiError::from(error),
            ClientApiError::Server("rate limited".to_string())
        );
    }

    #[test]
    fn test_sse_error_is_transport() {
        let error = RestClientError::Sse("connection reset".to_string());
        assert!(matches!(
            ClientApiError::from(error),
            ClientApiError::Transport(_)
        ));
    }
}
