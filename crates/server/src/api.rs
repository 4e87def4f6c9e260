// server/api.rs
// HTTP facade: resolves the request's session, dispatches meta / series /
// ingestion / diagnostics / template-CRUD operations, and re-issues the
// session cookie on every response.

use crate::ingest::{
    create_temp_csv, fetch_url_to_temp, index_temp_csv, FetchError, UPLOAD_TEMP_PREFIX,
};
use crate::session::{cookie_header, SessionStore};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use esx_core::{extract_series, parse_time_value, SeriesResponse};
use esx_diagnostics::{
    DiagnosticRunResponse, DiagnosticTemplate, Severity, StoreError, TemplateStore,
};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub struct AppState {
    pub sessions: SessionStore,
    pub templates: TemplateStore,
}

pub type SharedState = Arc<AppState>;

pub fn app(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/meta", get(meta))
        .route("/api/open", post(open_path))
        .route("/api/upload", post(upload))
        .route("/api/open-url", post(open_url))
        .route("/api/series", get(series))
        .route("/api/diagnostics/run", post(run_diagnostics))
        .route(
            "/api/diagnostics/templates",
            get(list_templates).post(save_template),
        )
        .route("/api/diagnostics/templates/export", get(export_templates))
        .route("/api/diagnostics/templates/import", post(import_templates))
        .route("/api/diagnostics/templates/:id", delete(delete_template))
        // Exports run to hundreds of MB; uploads must not hit the default
        // body cap.
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct OpenRequest {
    path: String,
}

#[derive(Debug, Deserialize)]
struct OpenUrlRequest {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RunRequest {
    template_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImportRequest {
    templates: Vec<DiagnosticTemplate>,
    replace: bool,
}

#[derive(Debug, Serialize)]
struct TemplateMeta {
    id: String,
    name: String,
    description: String,
    enabled: bool,
    severity: Severity,
}

impl From<&DiagnosticTemplate> for TemplateMeta {
    fn from(t: &DiagnosticTemplate) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            description: t.description.clone(),
            enabled: t.enabled,
            severity: t.severity,
        }
    }
}

fn json_with_cookie<T: Serialize>(status: StatusCode, sid: &str, payload: T) -> Response {
    (
        status,
        AppendHeaders([(header::SET_COOKIE, cookie_header(sid))]),
        Json(payload),
    )
        .into_response()
}

fn error_body(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": message.into() })
}

fn opened_file_body(df: &esx_core::DataFile) -> serde_json::Value {
    serde_json::json!({
        "file": df.label,
        "rows": df.rows,
        "start": df.start_time.map(|t| t.timestamp_millis()).unwrap_or(0),
        "end": df.end_time.map(|t| t.timestamp_millis()).unwrap_or(0),
    })
}

// ============================================================================
// Meta & series
// ============================================================================

async fn meta(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let (session, sid) = state.sessions.session_for(&headers).await;
    let payload = match session.data_file().await {
        Some(df) => serde_json::json!({
            "columns": df.columns,
            "rows": df.rows,
            "start": df.start_time.map(|t| t.timestamp_millis()).unwrap_or(0),
            "end": df.end_time.map(|t| t.timestamp_millis()).unwrap_or(0),
            "file": df.label,
            "loaded": true,
        }),
        None => serde_json::json!({
            "columns": [],
            "rows": 0,
            "start": 0,
            "end": 0,
            "file": "",
            "loaded": false,
        }),
    };
    json_with_cookie(StatusCode::OK, &sid, payload)
}

/// `start`/`end` accept Unix milliseconds or any supported layout.
fn parse_time_param(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ms) = value.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp_millis(ms);
    }
    parse_time_value(value).ok().map(|(ts, _)| ts)
}

async fn series(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let (session, sid) = state.sessions.session_for(&headers).await;

    let first = |key: &str| -> Option<&str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    let mut cols: Vec<usize> = params
        .iter()
        .filter(|(k, _)| k == "col")
        .filter_map(|(_, v)| v.trim().parse().ok())
        .collect();
    if cols.is_empty() {
        if let Some(joined) = first("cols") {
            cols = joined
                .split(',')
                .filter_map(|v| v.trim().parse().ok())
                .collect();
        }
    }
    if cols.is_empty() {
        return json_with_cookie(
            StatusCode::BAD_REQUEST,
            &sid,
            SeriesResponse {
                error: Some("no columns selected".to_string()),
                ..Default::default()
            },
        );
    }

    let df = match session.data_file().await {
        Some(df) => df,
        None => {
            return json_with_cookie(
                StatusCode::INTERNAL_SERVER_ERROR,
                &sid,
                SeriesResponse {
                    error: Some("no file loaded".to_string()),
                    ..Default::default()
                },
            );
        }
    };

    let start = first("start").and_then(parse_time_param);
    let end = first("end").and_then(parse_time_param);
    let max_points: u64 = first("maxPoints")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    match extract_series(&df, &cols, start, end, max_points) {
        Ok(resp) => json_with_cookie(StatusCode::OK, &sid, resp),
        Err(err) => json_with_cookie(
            StatusCode::INTERNAL_SERVER_ERROR,
            &sid,
            SeriesResponse {
                error: Some(err.to_string()),
                ..Default::default()
            },
        ),
    }
}

// ============================================================================
// File ingestion
// ============================================================================

async fn open_path(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<OpenRequest>,
) -> Response {
    let (session, sid) = state.sessions.session_for(&headers).await;
    let path = req.path.trim();
    if path.is_empty() {
        return json_with_cookie(StatusCode::BAD_REQUEST, &sid, error_body("path is required"));
    }
    let abs = match std::path::absolute(path) {
        Ok(abs) => abs,
        Err(_) => {
            return json_with_cookie(StatusCode::BAD_REQUEST, &sid, error_body("invalid path"));
        }
    };
    if std::fs::metadata(&abs).is_err() {
        return json_with_cookie(StatusCode::BAD_REQUEST, &sid, error_body("file not found"));
    }
    let mut df = match esx_core::build_index(&abs) {
        Ok(df) => df,
        Err(err) => {
            return json_with_cookie(
                StatusCode::BAD_REQUEST,
                &sid,
                error_body(format!("index build failed: {}", err)),
            );
        }
    };
    df.label = abs.display().to_string();
    let df = Arc::new(df);
    session.replace(Some(df.clone())).await;
    json_with_cookie(StatusCode::OK, &sid, opened_file_body(&df))
}

async fn upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let (session, sid) = state.sessions.session_for(&headers).await;

    while let Ok(Some(mut field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let label = field.file_name().unwrap_or("").trim().to_string();
        let (mut file, path) = match create_temp_csv(UPLOAD_TEMP_PREFIX) {
            Ok(created) => created,
            Err(err) => {
                return json_with_cookie(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &sid,
                    error_body(format!("failed to create temp file: {}", err)),
                );
            }
        };
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(err) = file.write_all(&chunk) {
                        let _ = std::fs::remove_file(&path);
                        return json_with_cookie(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            &sid,
                            error_body(format!("failed to write temp file: {}", err)),
                        );
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = std::fs::remove_file(&path);
                    return json_with_cookie(
                        StatusCode::BAD_REQUEST,
                        &sid,
                        error_body(format!("upload read failed: {}", err)),
                    );
                }
            }
        }
        drop(file);

        return match index_temp_csv(path, &label) {
            Ok(df) => {
                let df = Arc::new(df);
                session.replace(Some(df.clone())).await;
                json_with_cookie(StatusCode::OK, &sid, opened_file_body(&df))
            }
            Err(err) => json_with_cookie(
                StatusCode::BAD_REQUEST,
                &sid,
                error_body(format!("index build failed: {}", err)),
            ),
        };
    }

    json_with_cookie(StatusCode::BAD_REQUEST, &sid, error_body("file is required"))
}

async fn open_url(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<OpenUrlRequest>,
) -> Response {
    let (session, sid) = state.sessions.session_for(&headers).await;
    let url = req.url.trim();
    if url.is_empty() {
        return json_with_cookie(StatusCode::BAD_REQUEST, &sid, error_body("url is required"));
    }

    let (path, label) = match fetch_url_to_temp(url).await {
        Ok(fetched) => fetched,
        Err(err) => {
            let status = match err {
                FetchError::SchemeRejected | FetchError::InvalidUrl => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            };
            return json_with_cookie(status, &sid, error_body(err.to_string()));
        }
    };

    match index_temp_csv(path, &label) {
        Ok(df) => {
            let df = Arc::new(df);
            session.replace(Some(df.clone())).await;
            json_with_cookie(StatusCode::OK, &sid, opened_file_body(&df))
        }
        Err(err) => json_with_cookie(
            StatusCode::BAD_REQUEST,
            &sid,
            error_body(format!("invalid CSV from URL: {}", err)),
        ),
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

async fn run_diagnostics(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<RunRequest>,
) -> Response {
    let (session, sid) = state.sessions.session_for(&headers).await;
    let df = match session.data_file().await {
        Some(df) => df,
        None => {
            return json_with_cookie(
                StatusCode::BAD_REQUEST,
                &sid,
                DiagnosticRunResponse {
                    error: Some("no file loaded".to_string()),
                    ..Default::default()
                },
            );
        }
    };
    let selected = state.templates.select(&req.template_ids);
    match esx_diagnostics::run_diagnostics(&df, &selected) {
        Ok(resp) => json_with_cookie(StatusCode::OK, &sid, resp),
        Err(err) => json_with_cookie(
            StatusCode::INTERNAL_SERVER_ERROR,
            &sid,
            DiagnosticRunResponse {
                error: Some(err.to_string()),
                ..Default::default()
            },
        ),
    }
}

// ============================================================================
// Template CRUD
// ============================================================================

async fn list_templates(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let (_session, sid) = state.sessions.session_for(&headers).await;
    let metas: Vec<TemplateMeta> = state.templates.list().iter().map(TemplateMeta::from).collect();
    json_with_cookie(
        StatusCode::OK,
        &sid,
        serde_json::json!({ "templates": metas }),
    )
}

fn store_error_response(sid: &str, err: StoreError) -> Response {
    let status = match err {
        StoreError::BuiltinReadOnly(_) => StatusCode::FORBIDDEN,
        StoreError::Io(_) | StoreError::InvalidStoreFile(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    json_with_cookie(status, sid, error_body(err.to_string()))
}

async fn save_template(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(template): Json<DiagnosticTemplate>,
) -> Response {
    let (_session, sid) = state.sessions.session_for(&headers).await;
    match state.templates.upsert(template) {
        Ok(saved) => json_with_cookie(StatusCode::OK, &sid, saved),
        Err(err) => store_error_response(&sid, err),
    }
}

async fn delete_template(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let (_session, sid) = state.sessions.session_for(&headers).await;
    match state.templates.delete(&id) {
        Ok(()) => json_with_cookie(
            StatusCode::OK,
            &sid,
            serde_json::json!({ "deleted": true }),
        ),
        Err(err) => store_error_response(&sid, err),
    }
}

async fn export_templates(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let (_session, sid) = state.sessions.session_for(&headers).await;
    json_with_cookie(
        StatusCode::OK,
        &sid,
        serde_json::json!({ "templates": state.templates.export() }),
    )
}

async fn import_templates(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<ImportRequest>,
) -> Response {
    let (_session, sid) = state.sessions.session_for(&headers).await;
    match state.templates.import(req.templates, req.replace) {
        Ok(()) => json_with_cookie(
            StatusCode::OK,
            &sid,
            serde_json::json!({ "templates": state.templates.export() }),
        ),
        Err(err) => store_error_response(&sid, err),
    }
}
