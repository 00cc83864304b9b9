use std::time::Duration;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::models::{ProviderKind, ProviderStatus};

/// A single vendor call failed. Never fatal on its own: the manager fails over.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {source}")]
    Http {
        provider: ProviderKind,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned status {status}: {message}")]
    Status {
        provider: ProviderKind,
        status: u16,
        message: String,
    },
    #[error("{provider} response did not contain generated text")]
    EmptyResponse { provider: ProviderKind },
    #[error("{provider} did not respond within {timeout:?}")]
    Timeout {
        provider: ProviderKind,
        timeout: Duration,
    },
    #[error("{provider} is not configured: {reason}")]
    NotConfigured {
        provider: ProviderKind,
        reason: String,
    },
}

impl ProviderError {
    pub fn http(provider: ProviderKind, source: reqwest::Error) -> Self {
        ProviderError::Http { provider, source }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("{provider} output failed the quality gate (score {score:.2}): {reason}")]
    QualityGate {
        provider: ProviderKind,
        score: f64,
        reason: String,
    },
    #[error("{provider} output diverged from prior content (consistency {score:.2} < {threshold:.2})")]
    ConsistencyGate {
        provider: ProviderKind,
        score: f64,
        threshold: f64,
    },
    #[error("{provider} is cooling down for another {remaining:?}")]
    RateLimited {
        provider: ProviderKind,
        remaining: Duration,
    },
    #[error("no providers are configured")]
    NoProvidersConfigured,
    #[error("all providers exhausted after {attempted} attempt(s); last error: {last}")]
    AllProvidersExhausted {
        attempted: usize,
        #[source]
        last: Box<GenerationError>,
    },
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Generation failed: {error}")]
    Generation {
        error: GenerationError,
        providers: Vec<ProviderStatus>,
    },
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Generation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ApiError::InvalidRequest(message) => json!({
                "success": false,
                "error": message,
            }),
            ApiError::Generation { error, providers } => json!({
                "success": false,
                "error": error.to_string(),
                "providers": providers,
            }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
