use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    response::{Html, Json},
    routing::{get, post},
};
use chrono::Utc;
use http::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, ApiResult};
use crate::models::{BookSpec, ChapterOutline, ContentType, GenerationRequest, ProviderKind};
use crate::services::book::BookOrchestrator;
use crate::services::manager::ProviderManager;

const SERVICE_NAME: &str = "bookforge";

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ProviderManager>,
    pub books: Arc<BookOrchestrator>,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/api/status", get(api_status))
        .route("/api/ai-status", get(ai_status))
        .route("/api/generate-content", post(generate_content))
        .route("/api/generate-book", post(generate_book))
        .route("/api/test-providers", post(test_providers))
        .with_state(state)
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST])
                    .allow_headers(Any),
            ),
        )
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let rows: String = state
        .manager
        .provider_status()
        .await
        .iter()
        .map(|status| {
            let label = if status.available {
                "available"
            } else if status.rate_limited {
                "cooling down"
            } else {
                "not configured"
            };
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                html_escape::encode_text(status.name.as_str()),
                html_escape::encode_text(status.model.as_deref().unwrap_or("-")),
                label
            )
        })
        .collect();

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Bookforge</title>
    <meta charset="utf-8">
    <style>
        body {{ font-family: Arial, sans-serif; margin: 40px; }}
        .info-box {{ background-color: #f0f8ff; padding: 20px; border-radius: 8px; margin: 20px 0; }}
        .endpoint {{ background-color: #f5f5f5; padding: 10px; margin: 10px 0; border-radius: 4px; font-family: monospace; }}
        td, th {{ padding: 4px 12px; text-align: left; }}
    </style>
</head>
<body>
    <h1>Bookforge</h1>

    <div class="info-box">
        <h2>AI Providers</h2>
        <table>
            <tr><th>Provider</th><th>Model</th><th>State</th></tr>
            {rows}
        </table>
    </div>

    <h2>Available Endpoints:</h2>
    <div class="endpoint">GET /health - Health check</div>
    <div class="endpoint">GET /api/status - Service status and features</div>
    <div class="endpoint">GET /api/ai-status - Provider availability</div>
    <div class="endpoint">POST /api/generate-content - Generate text with failover</div>
    <div class="endpoint">POST /api/generate-book - Generate a book from a chapter outline</div>
    <div class="endpoint">POST /api/test-providers - Send a short prompt to every provider</div>
</body>
</html>
"#
    ))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let providers: Vec<Value> = state
        .manager
        .provider_status()
        .await
        .into_iter()
        .map(|status| {
            json!({
                "name": status.name,
                "available": status.available,
                "lastUsed": status.last_used,
            })
        })
        .collect();

    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": Utc::now(),
        "ai_providers": providers,
    }))
}

async fn api_status(State(state): State<AppState>) -> Json<Value> {
    let providers = state.manager.provider_status().await;
    let available = providers.iter().filter(|p| p.available).count();
    let status = if state.manager.configured_count() > 0 {
        "operational"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "availableProviders": available,
        "providers": providers,
        "features": {
            "multiProviderFailover": true,
            "rateLimiting": true,
            "qualityValidation": true,
            "consistencyChecking": true,
            "bookGeneration": true,
            "persistence": false,
            "streaming": false,
        },
    }))
}

async fn ai_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "providers": state.manager.provider_status().await,
        "timestamp": Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody {
    prompt: Option<String>,
    #[serde(rename = "type")]
    content_type: Option<String>,
    provider: Option<String>,
    max_retries: Option<u32>,
    previous_content: Option<String>,
    check_consistency: Option<bool>,
}

async fn generate_content(
    State(state): State<AppState>,
    payload: Result<Json<GenerateContentBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    let prompt = body
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("prompt is required".to_string()))?;
    let provider = body
        .provider
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.parse::<ProviderKind>())
        .transpose()
        .map_err(ApiError::InvalidRequest)?;

    let mut request = GenerationRequest::new(prompt)
        .content_type(body.content_type.as_deref().map_or_else(ContentType::default, ContentType::from_tag))
        .provider(provider)
        .max_retries(body.max_retries.unwrap_or(GenerationRequest::DEFAULT_MAX_RETRIES));
    if let Some(previous) = body.previous_content {
        if body.check_consistency.unwrap_or(true) {
            request = request.consistent_with(previous);
        }
    }

    match state.manager.generate_content(&request).await {
        Ok(result) => Ok(Json(json!({ "success": true, "result": result }))),
        Err(error) => Err(ApiError::Generation {
            error,
            providers: state.manager.provider_status().await,
        }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OutlineEntry {
    Title(String),
    Detailed(ChapterOutline),
}

impl From<OutlineEntry> for ChapterOutline {
    fn from(entry: OutlineEntry) -> Self {
        match entry {
            OutlineEntry::Title(title) => ChapterOutline::titled(title),
            OutlineEntry::Detailed(outline) => outline,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateBookBody {
    title: Option<String>,
    genre: Option<String>,
    style: Option<String>,
    audience: Option<String>,
    chapters: Option<Vec<OutlineEntry>>,
}

async fn generate_book(
    State(state): State<AppState>,
    payload: Result<Json<GenerateBookBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    let title = body
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("title is required".to_string()))?;
    let outline: Vec<ChapterOutline> = body
        .chapters
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("chapters must be a non-empty list".to_string()))?
        .into_iter()
        .map(ChapterOutline::from)
        .collect();
    if outline.iter().any(|c| c.title.trim().is_empty()) {
        return Err(ApiError::InvalidRequest("chapter titles must not be empty".to_string()));
    }

    let mut spec = BookSpec::new(title);
    if let Some(genre) = body.genre {
        spec.genre = genre;
    }
    if let Some(style) = body.style {
        spec.style = style;
    }
    if let Some(audience) = body.audience {
        spec.audience = audience;
    }

    let book = state.books.generate_book(&spec, &outline).await;
    Ok(Json(json!({ "success": true, "book": book })))
}

async fn test_providers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "results": state.manager.test_providers().await }))
}
