//! HTTP routes
//!
//! ```text
//! GET  /                              HTML listing of every metric
//! GET  /ping                          store liveness
//! POST /value/                        JSON point lookup
//! POST /update/                       JSON single update
//! POST /updates/                      JSON batch update
//! GET  /value/:kind/:name             plain-text value
//! POST /update/:kind/:name/:value     URL-encoded update
//! ```

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::fmt::Write as _;
use std::sync::Arc;
use tally_core::{validate_batch, Metric, MetricKind, MetricPayload, MetricValue, TallyError};
use tally_storage::MetricStore;
use tracing::debug;

use crate::error::ApiError;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/ping", get(handle_ping))
        .route("/value/", post(handle_value_json))
        .route("/update/", post(handle_update_json))
        .route("/updates/", post(handle_updates_json))
        .route("/value/:kind/:name", get(handle_value))
        .route("/update/:kind/:name/:value", post(handle_update))
        .with_state(state)
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("malformed JSON: {}", e)))
}

/// HTML listing of all metrics
async fn handle_index(State(state): State<AppState>) -> Html<String> {
    let mut page = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>Metrics</title></head>\n<body>\n<table>\n\
         <tr><th>Type</th><th>Name</th><th>Value</th></tr>\n",
    );
    for metric in state.store.all().await {
        let _ = writeln!(
            page,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            metric.kind(),
            escape_html(&metric.id),
            metric.value
        );
    }
    page.push_str("</table>\n</body>\n</html>\n");
    Html(page)
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn handle_ping(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.ping().await?;
    Ok(StatusCode::OK)
}

/// `{"id","type"}` in, full metric JSON out
async fn handle_value_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MetricPayload>, ApiError> {
    let request: MetricPayload = parse_json(&body)?;
    let kind = request.identity()?;
    let value = state
        .store
        .get(kind, &request.id)
        .await
        .ok_or_else(|| TallyError::NotFound(format!("{} {}", kind, request.id)))?;

    Ok(Json(MetricPayload::from(Metric {
        id: request.id,
        value,
    })))
}

/// Apply one JSON update and echo the metric back
async fn handle_update_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MetricPayload>, ApiError> {
    let payload: MetricPayload = parse_json(&body)?;
    let metric = Metric::try_from(payload)?;
    state.store.apply(&metric).await?;
    debug!("Updated {} {} = {}", metric.kind(), metric.id, metric.value);
    Ok(Json(MetricPayload::from(metric)))
}

/// Batch update: every entry is validated before any is applied
async fn handle_updates_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let payloads: Vec<MetricPayload> = parse_json(&body)?;
    if payloads.is_empty() {
        return Err(ApiError::bad_request("empty batch"));
    }

    let metrics = validate_batch(payloads)?;
    for metric in &metrics {
        state.store.apply(metric).await?;
    }
    debug!("Applied batch of {} metrics", metrics.len());
    Ok(StatusCode::OK)
}

async fn handle_value(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind: MetricKind = kind.parse()?;
    let value = state
        .store
        .get(kind, &name)
        .await
        .ok_or_else(|| TallyError::NotFound(format!("{} {}", kind, name)))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        value.to_string(),
    )
        .into_response())
}

async fn handle_update(
    State(state): State<AppState>,
    Path((kind, name, raw)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let kind: MetricKind = kind.parse()?;
    if name.is_empty() {
        return Err(TallyError::MissingField("name").into());
    }
    let value = MetricValue::parse(kind, &raw)?;
    state.store.apply(&Metric { id: name, value }).await?;
    Ok(StatusCode::OK)
}
