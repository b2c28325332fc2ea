use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

use tidepool_common::{TidepoolError, Window};
use tidepool_feed::{FeedQuery, PinnedQuery};
use tidepool_ingest::{FetchWindow, IngestStats};

use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(status))
        .route("/feed", get(feed))
        .route("/interactions", post(record_interaction))
        .route("/interactions/batch", post(record_interaction_batch))
        .route(
            "/users/{user_id}/pinned-events",
            get(get_pinned_events).post(set_pinned_event),
        )
        .route("/tag-proposals", get(tag_proposals))
        .route("/admin/ingest", post(admin_ingest))
        .layer(cors)
        .with_state(state)
}

// --- Error mapping ---

struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl From<TidepoolError> for ApiError {
    fn from(err: TidepoolError) -> Self {
        match err {
            TidepoolError::Validation(message) => {
                let error = if message.contains("page token") {
                    "Invalid page token"
                } else if message.contains("bundleState") {
                    "Invalid bundle metadata"
                } else {
                    "Validation error"
                };
                Self {
                    status: StatusCode::BAD_REQUEST,
                    error,
                    message,
                }
            }
            TidepoolError::Auth(message) => Self {
                status: StatusCode::FORBIDDEN,
                error: "Forbidden",
                message,
            },
            TidepoolError::NotFound(message) => Self {
                status: StatusCode::NOT_FOUND,
                error: "Not found",
                message,
            },
            TidepoolError::Parse(message) => Self {
                status: StatusCode::BAD_REQUEST,
                error: "Parse error",
                message,
            },
            other => {
                error!(error = %other, "internal error");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    error: "Internal error",
                    message: "internal error".to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.error, "message": self.message })),
        )
            .into_response()
    }
}

fn check_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided != Some(state.api_key.as_str()) {
        return Err(ApiError::from(TidepoolError::Auth(
            "missing or invalid API key".to_string(),
        )));
    }
    Ok(())
}

// --- Handlers ---

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "services": {
            "store": state.store_backend,
            "llm": "anthropic",
            "embeddings": "voyage",
        },
        "timestamp": Utc::now(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedParams {
    user_id: Option<String>,
    start: Option<NaiveDate>,
    days: Option<u32>,
    page_size: Option<usize>,
    page_token: Option<String>,
    /// Comma-separated slugs.
    tags: Option<String>,
}

async fn feed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> Result<Json<Value>, ApiError> {
    check_api_key(&state, &headers)?;

    let tags: Vec<String> = params
        .tags
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let query = FeedQuery {
        user_id: params.user_id,
        start: params.start,
        days: params.days,
        page_size: params.page_size,
        page_token: params.page_token,
        tags,
    };

    // Owned RNG: the thread-local one cannot be held across the await.
    let mut rng = StdRng::from_os_rng();
    let page = state.feed.feed(&query, Utc::now(), &mut rng).await?;
    Ok(Json(serde_json::to_value(page).unwrap_or(Value::Null)))
}

async fn record_interaction(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    check_api_key(&state, &headers)?;

    let ids = state
        .interactions
        .record_interactions(std::slice::from_ref(&body), Utc::now())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "interactionId": ids[0] })),
    )
        .into_response())
}

async fn record_interaction_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    check_api_key(&state, &headers)?;

    let interactions = body
        .get("interactions")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ApiError::from(TidepoolError::validation(
                "interactions array is required".to_string(),
            ))
        })?;

    let ids = state
        .interactions
        .record_interactions(interactions, Utc::now())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "count": ids.len(),
            "interactionIds": ids,
        })),
    )
        .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinnedParams {
    mode: Option<String>,
    start: Option<chrono::DateTime<Utc>>,
    end: Option<chrono::DateTime<Utc>>,
    page_size: Option<usize>,
    page_token: Option<String>,
}

async fn get_pinned_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(params): Query<PinnedParams>,
) -> Result<Json<Value>, ApiError> {
    check_api_key(&state, &headers)?;
    check_user_header(&headers, &user_id)?;

    let query = PinnedQuery {
        mode: params.mode,
        start: params.start,
        end: params.end,
        page_size: params.page_size,
        page_token: params.page_token,
    };
    let page = state
        .pinned
        .get_pinned_events(&user_id, &query, Utc::now())
        .await?;
    Ok(Json(serde_json::to_value(page).unwrap_or(Value::Null)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinBody {
    event_id: String,
    pinned: Option<bool>,
}

async fn set_pinned_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(body): Json<PinBody>,
) -> Result<Json<Value>, ApiError> {
    check_api_key(&state, &headers)?;
    check_user_header(&headers, &user_id)?;

    let pinned = body.pinned.unwrap_or(true);
    let entry = state
        .pinned
        .set_event_pin(&user_id, &body.event_id, pinned, Utc::now())
        .await?;
    Ok(Json(json!({
        "pinned": pinned,
        "event": entry.map(|e| serde_json::to_value(e).unwrap_or(Value::Null)),
    })))
}

#[derive(Deserialize)]
struct ProposalParams {
    limit: Option<usize>,
}

async fn tag_proposals(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ProposalParams>,
) -> Result<Json<Value>, ApiError> {
    check_api_key(&state, &headers)?;

    let limit = match params.limit {
        None => 20,
        Some(n) if (1..=100).contains(&n) => n,
        Some(n) => {
            return Err(ApiError::from(TidepoolError::validation(format!(
                "limit must be between 1 and 100, got {n}"
            ))))
        }
    };

    let proposals = state
        .proposals
        .top_proposals(limit)
        .await
        .map_err(|e| ApiError::from(TidepoolError::Anyhow(e)))?;
    Ok(Json(json!({
        "count": proposals.len(),
        "proposals": proposals,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestBody {
    source_id: Option<String>,
    start: Option<NaiveDate>,
    days: Option<u32>,
    #[serde(default)]
    force_refresh: bool,
}

/// Admin trigger: the same shape the scheduled ingest uses. Per-source
/// failures are logged and the remaining sources still run.
async fn admin_ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IngestBody>,
) -> Result<Json<Value>, ApiError> {
    check_api_key(&state, &headers)?;

    let now = Utc::now();
    let mut total = IngestStats::default();
    let mut failed_sources = Vec::new();

    for adapter in &state.sources {
        if let Some(wanted) = &body.source_id {
            if adapter.source_id() != wanted {
                continue;
            }
        }

        let result = match (body.start, body.days) {
            (Some(start), days) => {
                let window =
                    Window::days_from(start, days.unwrap_or(7), state.display_timezone);
                state
                    .ingestor
                    .run_chunked(
                        adapter.as_ref(),
                        window,
                        adapter.chunk_days(),
                        body.force_refresh,
                        now,
                    )
                    .await
            }
            (None, _) => {
                state
                    .ingestor
                    .run(adapter.as_ref(), &FetchWindow::Default, body.force_refresh, now)
                    .await
            }
        };

        match result {
            Ok(stats) => total += stats,
            Err(e) => {
                warn!(source_id = adapter.source_id(), error = %e, "source ingest failed");
                failed_sources.push(adapter.source_id().to_string());
            }
        }
    }

    Ok(Json(json!({
        "stats": total,
        "failedSources": failed_sources,
    })))
}

fn check_user_header(headers: &HeaderMap, user_id: &str) -> Result<(), ApiError> {
    if let Some(header_user) = headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        if header_user != user_id {
            return Err(ApiError::from(TidepoolError::Auth(
                "x-user-id does not match the requested user".to_string(),
            )));
        }
    }
    Ok(())
}
