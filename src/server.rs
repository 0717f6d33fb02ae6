// Dramabox Core - REST facade over the Dramabox mobile API
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! HTTP shell over [`DramaboxClient`]
//!
//! Every response uses the same JSON envelope:
//!
//! ```json
//! { "success": true, "data": ..., "timestamp": "2025-01-01T00:00:00Z" }
//! { "success": false, "error": { "code": "validation", "message": "..." }, "timestamp": "..." }
//! ```
//!
//! Paginated listings add `pagination { page, size, hasMore }`. The full
//! chapter listing adds `warnings` with whatever the pager swallowed.

use crate::api::models::Page;
use crate::api::{CacheStats, Category, ChapterRecord, DramaDetail, DramaSummary, DramaboxClient, StreamInfo};
use crate::error::DramaboxError;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const DEFAULT_PAGE_SIZE: u32 = 20;

type AppState = Arc<DramaboxClient>;

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    page: u32,
    size: u32,
    has_more: bool,
}

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    timestamp: String,
}

impl<T: Serialize> Envelope<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            pagination: None,
            warnings: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn paginated(data: T, page: u32, size: u32, has_more: bool) -> Self {
        Self {
            pagination: Some(Pagination { page, size, has_more }),
            ..Self::ok(data)
        }
    }
}

fn paged<T: Serialize + Clone>(page: &Page<T>, number: u32, size: u32) -> Json<Envelope<Vec<T>>> {
    Json(Envelope::paginated(page.items.clone(), number, size, page.has_more))
}

// ============================================================================
// Errors
// ============================================================================

/// A [`DramaboxError`] on its way to becoming an HTTP response
#[derive(Debug)]
pub struct ApiError(DramaboxError);

impl From<DramaboxError> for ApiError {
    fn from(err: DramaboxError) -> Self {
        Self(err)
    }
}

/// HTTP status the shell answers with for a core error
pub fn status_for(err: &DramaboxError) -> StatusCode {
    match err {
        DramaboxError::Validation(_) => StatusCode::BAD_REQUEST,
        DramaboxError::NotFound(_) => StatusCode::NOT_FOUND,
        DramaboxError::UpstreamStatus { status: 404, .. } => StatusCode::NOT_FOUND,
        DramaboxError::UpstreamStatus { .. } | DramaboxError::UpstreamRejected { .. } => StatusCode::BAD_GATEWAY,
        DramaboxError::Transport { .. } => StatusCode::SERVICE_UNAVAILABLE,
        DramaboxError::RetriesExhausted { source, .. } | DramaboxError::TokenAcquisitionFailed { source, .. } => {
            status_for(source)
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let body: Envelope<()> = Envelope {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: self.0.category(),
                message: self.0.user_message(),
            }),
            pagination: None,
            warnings: None,
            timestamp: Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Deserialize)]
struct LangQuery {
    lang: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    size: Option<u32>,
    lang: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default, alias = "query", alias = "q")]
    keyword: String,
    page: Option<u32>,
    size: Option<u32>,
    lang: Option<String>,
}

fn lang_or_default(client: &DramaboxClient, lang: Option<String>) -> String {
    lang.unwrap_or_else(|| client.config().default_language.clone())
}

// ============================================================================
// Router
// ============================================================================

/// Routes for every client operation plus `/health`
pub fn router(client: Arc<DramaboxClient>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/search", get(search))
        .route("/api/home", get(home))
        .route("/api/vip", get(vip))
        .route("/api/dramas/{id}", get(detail))
        .route("/api/dramas/{id}/chapters", get(chapters))
        .route("/api/dramas/{id}/chapters/all", get(all_chapters))
        .route("/api/dramas/{id}/episodes/{episode}/stream", get(stream))
        .route("/api/categories", get(categories))
        .route("/api/categories/{id}", get(by_category))
        .route("/api/recommended", get(recommended))
        .route("/api/cache", delete(clear_cache))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/debug/headers", get(debug_headers))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(client)
}

/// Serve until Ctrl+C, then drop every cached response and token
pub async fn serve(addr: SocketAddr, client: Arc<DramaboxClient>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "dramabox facade listening");

    axum::serve(listener, router(client.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    client.shutdown().await;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<Envelope<&'static str>> {
    Json(Envelope::ok("ok"))
}

async fn search(
    State(client): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<DramaSummary>> {
    let page = query.page.unwrap_or(1);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);
    let lang = lang_or_default(&client, query.lang);
    let result = client.search(&query.keyword, page, size, &lang).await?;
    Ok(paged(&result, page, size))
}

async fn home(
    State(client): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<DramaSummary>> {
    let page = query.page.unwrap_or(1);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);
    let lang = lang_or_default(&client, query.lang);
    let result = client.list_home(page, size, &lang).await?;
    Ok(paged(&result, page, size))
}

async fn vip(State(client): State<AppState>, Query(query): Query<LangQuery>) -> ApiResult<serde_json::Value> {
    let lang = lang_or_default(&client, query.lang);
    let theater = client.get_vip_theater(&lang).await?;
    Ok(Json(Envelope::ok((*theater).clone())))
}

async fn detail(
    State(client): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<LangQuery>,
) -> ApiResult<DramaDetail> {
    let lang = lang_or_default(&client, query.lang);
    let detail = client.get_detail(&id, &lang).await?;
    Ok(Json(Envelope::ok((*detail).clone())))
}

async fn chapters(
    State(client): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<LangQuery>,
) -> ApiResult<Vec<ChapterRecord>> {
    let lang = lang_or_default(&client, query.lang);
    let chapters = client.list_chapters(&id, &lang).await?;
    Ok(Json(Envelope::ok((*chapters).clone())))
}

async fn all_chapters(
    State(client): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<LangQuery>,
) -> ApiResult<Vec<ChapterRecord>> {
    let lang = lang_or_default(&client, query.lang);
    let listing = client.batch_list_all_chapters(&id, &lang).await;

    // Bad input is still a caller error; everything else degrades to warnings
    if listing.value.is_empty() {
        if let Some(DramaboxError::Validation(message)) = listing.suppressed.first() {
            return Err(DramaboxError::validation(message.clone()).into());
        }
    }

    let warnings: Vec<String> = listing.suppressed.iter().map(|err| err.to_string()).collect();
    let mut envelope = Envelope::ok(listing.value);
    if !warnings.is_empty() {
        envelope.warnings = Some(warnings);
    }
    Ok(Json(envelope))
}

async fn stream(
    State(client): State<AppState>,
    AxumPath((id, episode)): AxumPath<(String, u32)>,
    Query(query): Query<LangQuery>,
) -> ApiResult<StreamInfo> {
    let lang = lang_or_default(&client, query.lang);
    let info = client.get_stream_url(&id, episode, &lang).await?;
    Ok(Json(Envelope::ok((*info).clone())))
}

async fn categories(
    State(client): State<AppState>,
    Query(query): Query<LangQuery>,
) -> ApiResult<Vec<Category>> {
    let lang = lang_or_default(&client, query.lang);
    let categories = client.list_categories(&lang).await?;
    Ok(Json(Envelope::ok((*categories).clone())))
}

async fn by_category(
    State(client): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<DramaSummary>> {
    let page = query.page.unwrap_or(1);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);
    let lang = lang_or_default(&client, query.lang);
    let result = client.list_by_category(&id, page, size, &lang).await?;
    Ok(paged(&result, page, size))
}

async fn recommended(
    State(client): State<AppState>,
    Query(query): Query<LangQuery>,
) -> ApiResult<Vec<DramaSummary>> {
    let lang = lang_or_default(&client, query.lang);
    let dramas = client.list_recommended(&lang).await?;
    Ok(Json(Envelope::ok((*dramas).clone())))
}

async fn clear_cache(State(client): State<AppState>) -> Json<Envelope<&'static str>> {
    client.clear_cache().await;
    Json(Envelope::ok("cache cleared"))
}

async fn cache_stats(State(client): State<AppState>) -> Json<Envelope<CacheStats>> {
    Json(Envelope::ok(client.get_cache_stats().await))
}

async fn debug_headers(
    State(client): State<AppState>,
    Query(query): Query<LangQuery>,
) -> ApiResult<BTreeMap<String, String>> {
    let lang = lang_or_default(&client, query.lang);
    Ok(Json(Envelope::ok(client.get_debug_headers(&lang).await?)))
}
