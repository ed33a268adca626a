//! HTTP API handlers (C8).
//!
//! Thin controllers: validate query parameters, consult the caches, invoke
//! the normalizer/planner/engines, and shape the JSON envelope. Object keys
//! may contain slashes, so the tree endpoints hang off a single wildcard
//! route whose final path segment selects the action.

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::cache_key;
use crate::data;
use crate::error::AppError;
use crate::hfile::{DatasetInfo, HFile};
use crate::plan::{self, LineParams, MatrixParams};
use crate::preview::{build_preview, PreviewOptions};
use crate::selection::{
    self, normalize_selection, DataMode, LineQuality, PreviewDetail, PreviewMode,
};
use crate::types::{
    AppContext, DEFAULT_COL_LIMIT, DEFAULT_MAX_SIZE, DEFAULT_ROW_LIMIT, MAX_LINE_POINTS,
};

/// Build the service router. Layers (CORS, tracing, compression) are applied
/// by the caller.
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/files", get(list_files))
        .route("/files/", get(list_files))
        .route("/files/refresh", post(refresh_files))
        .route("/files/{*rest}", get(files_dispatch))
        .with_state(ctx)
}

// ---------------------------------------------------------------------------
// Query parameter parsing
// ---------------------------------------------------------------------------

type Params = BTreeMap<String, String>;

fn param<'a>(params: &'a Params, name: &str) -> Option<&'a str> {
    params.get(name).map(String::as_str)
}

fn require_param<'a>(params: &'a Params, name: &str) -> Result<&'a str, AppError> {
    param(params, name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::InvalidSelection(format!("Missing required parameter: {name}")))
}

fn parse_usize(name: &str, raw: Option<&str>, default: usize, min: usize) -> Result<usize, AppError> {
    let Some(raw) = raw else { return Ok(default) };
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::InvalidSelection(format!("Invalid {name} parameter")))?;
    if value < min as i64 {
        return Err(AppError::InvalidSelection(format!("{name} must be >= {min}")));
    }
    Ok(value as usize)
}

fn parse_opt_usize(name: &str, raw: Option<&str>, min: usize) -> Result<Option<usize>, AppError> {
    match raw {
        None => Ok(None),
        Some(raw) => parse_usize(name, Some(raw), 0, min).map(Some),
    }
}

fn parse_bounded(
    name: &str,
    raw: Option<&str>,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, AppError> {
    let Some(raw) = raw else { return Ok(default) };
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::InvalidSelection(format!("Invalid {name} parameter")))?;
    if value < min as i64 || value > max as i64 {
        return Err(AppError::InvalidSelection(format!(
            "{name} must be between {min} and {max}"
        )));
    }
    Ok(value as usize)
}

fn parse_bool(name: &str, raw: Option<&str>, default: bool) -> Result<bool, AppError> {
    let Some(raw) = raw else { return Ok(default) };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::InvalidSelection(format!("Invalid {name} parameter"))),
    }
}

/// Cache-version tag: a client-supplied `etag` hint, or the literal `ttl`
/// when the endpoint relies solely on its TTL.
fn resolve_cache_version(params: &Params) -> String {
    match param(params, "etag").map(str::trim) {
        Some(tag) if !tag.is_empty() => tag.to_string(),
        _ => "ttl".to_string(),
    }
}

/// Deterministic query-string form for cache keys: sorted names, `etag`
/// excluded.
fn canonical_args(params: &Params) -> String {
    params
        .iter()
        .filter(|(name, _)| name.as_str() != "etag")
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Liveness probe with version and uptime.
async fn health(State(ctx): State<AppContext>) -> Json<JsonValue> {
    Json(json!({
        "status": "healthy",
        "service": "hview-server",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": ctx.start_time.elapsed().as_secs(),
    }))
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// List bucket contents with virtual folders, short-TTL cached.
async fn list_files(
    State(ctx): State<AppContext>,
    Query(params): Query<Params>,
) -> Result<Json<JsonValue>, AppError> {
    let prefix = param(&params, "prefix").unwrap_or("").trim().to_string();
    let include_folders = parse_bool("include_folders", param(&params, "include_folders"), true)?;
    let max_items = parse_bounded("max_items", param(&params, "max_items"), 20000, 1, 50000)?;

    let key = format!("files_list:{prefix}:{include_folders}:{max_items}");
    if let Some(entries) = ctx.caches.files.get(&key) {
        tracing::info!("files list requested - CACHE HIT");
        return Ok(Json(listing_response(&prefix, include_folders, max_items, entries, true)));
    }

    tracing::info!("files list requested - CACHE MISS");
    let result = ctx.store.list(&prefix, include_folders, max_items).await?;
    let entries = serde_json::to_value(&result.entries)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    ctx.caches.files.set(&key, entries.clone());

    Ok(Json(listing_response(&prefix, include_folders, max_items, entries, false)))
}

fn listing_response(
    prefix: &str,
    include_folders: bool,
    max_items: usize,
    entries: JsonValue,
    cached: bool,
) -> JsonValue {
    let empty = Vec::new();
    let list = entries.as_array().unwrap_or(&empty);
    let files_count = list.iter().filter(|e| e["type"] == "file").count();
    let folders_count = list.iter().filter(|e| e["type"] == "folder").count();
    json!({
        "success": true,
        "count": list.len(),
        "files": entries,
        "files_count": files_count,
        "folders_count": folders_count,
        "truncated": files_count >= max_items,
        "prefix": prefix,
        "include_folders": include_folders,
        "max_items": max_items,
        "cached": cached,
    })
}

/// Flush the file-list cache.
async fn refresh_files(State(ctx): State<AppContext>) -> Json<JsonValue> {
    ctx.caches.files.clear();
    tracing::info!("files cache manually refreshed");
    Json(json!({ "success": true, "message": "Cache cleared successfully" }))
}

// ---------------------------------------------------------------------------
// Tree route dispatch
// ---------------------------------------------------------------------------

/// Route `/files/{key...}/{action}` where the object key may itself contain
/// slashes. The final segment picks the action.
async fn files_dispatch(
    State(ctx): State<AppContext>,
    AxumPath(rest): AxumPath<String>,
    Query(params): Query<Params>,
) -> Result<Response, AppError> {
    let Some((key, action)) = rest.rsplit_once('/') else {
        return Err(AppError::NotFound("Not found".into()));
    };
    if key.is_empty() {
        return Err(AppError::NotFound("Not found".into()));
    }

    match action {
        "children" => children(ctx, key, &params).await.map(IntoResponse::into_response),
        "meta" => metadata(ctx, key, &params).await.map(IntoResponse::into_response),
        "preview" => preview(ctx, key, &params).await.map(IntoResponse::into_response),
        "data" => data_window(ctx, key, &params).await.map(IntoResponse::into_response),
        "export" => export_csv(ctx, key, &params).await,
        _ => Err(AppError::NotFound("Not found".into())),
    }
}

// ---------------------------------------------------------------------------
// Children
// ---------------------------------------------------------------------------

/// One lazy tree level. Cache keys embed the object's etag, so a changed
/// object invalidates naturally.
async fn children(
    ctx: AppContext,
    key: &str,
    params: &Params,
) -> Result<Json<JsonValue>, AppError> {
    let path = param(params, "path").unwrap_or("/").to_string();

    let meta = ctx.store.head(key).await?;
    let ck = cache_key(&["children", key, meta.etag.as_str(), path.as_str()]);

    if let Some(cached) = ctx.caches.tree.get(&ck) {
        tracing::info!(key = %key, path = %path, "children requested - CACHE HIT");
        return Ok(Json(json!({
            "success": true,
            "key": key,
            "path": path,
            "children": cached,
            "cached": true,
        })));
    }

    tracing::info!(key = %key, path = %path, "children requested - CACHE MISS");
    let hfile = HFile::open(Arc::clone(&ctx.store), key).await?;
    let children = hfile.children(&path).await?;
    let value = serde_json::to_value(&children).map_err(|e| AppError::Internal(e.to_string()))?;
    ctx.caches.tree.set(&ck, value.clone());

    Ok(Json(json!({
        "success": true,
        "key": key,
        "path": path,
        "children": value,
        "cached": false,
    })))
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Full node metadata: dtype classification, filter pipeline, attributes.
async fn metadata(
    ctx: AppContext,
    key: &str,
    params: &Params,
) -> Result<Json<JsonValue>, AppError> {
    let path = require_param(params, "path")?.to_string();

    let meta = ctx.store.head(key).await?;
    let ck = cache_key(&["meta", key, meta.etag.as_str(), path.as_str()]);

    if let Some(cached) = ctx.caches.tree.get(&ck) {
        tracing::info!(key = %key, path = %path, "metadata requested - CACHE HIT");
        return Ok(Json(json!({
            "success": true,
            "key": key,
            "metadata": cached,
            "cached": true,
        })));
    }

    tracing::info!(key = %key, path = %path, "metadata requested - CACHE MISS");
    let hfile = HFile::open(Arc::clone(&ctx.store), key).await?;
    let node_meta = hfile.metadata(&path).await?;
    let value = serde_json::to_value(&node_meta).map_err(|e| AppError::Internal(e.to_string()))?;
    ctx.caches.tree.set(&ck, value.clone());

    Ok(Json(json!({
        "success": true,
        "key": key,
        "metadata": value,
        "cached": false,
    })))
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

async fn preview(
    ctx: AppContext,
    key: &str,
    params: &Params,
) -> Result<Json<JsonValue>, AppError> {
    let path = require_param(params, "path")?.to_string();
    let mode = PreviewMode::parse(param(params, "mode"));
    let detail = PreviewDetail::parse(param(params, "detail"))?;
    let include_stats = parse_bool(
        "include_stats",
        param(params, "include_stats"),
        detail == PreviewDetail::Full,
    )?;
    let display_param = param(params, "display_dims");
    let fixed_param = param(params, "fixed_indices");

    let max_size = match param(params, "max_size") {
        None => None,
        Some(raw) => {
            let value: i64 = raw.trim().parse().map_err(|_| {
                AppError::InvalidSelection("Invalid max_size parameter".into())
            })?;
            if value <= 0 {
                return Err(AppError::InvalidSelection(
                    "max_size must be a positive integer".into(),
                ));
            }
            Some(value as usize)
        }
    };

    let cache_version = resolve_cache_version(params);
    let display_key = display_param.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("none");
    let fixed_key = fixed_param.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("none");
    let max_size_key =
        max_size.map(|v| v.to_string()).unwrap_or_else(|| "default".to_string());
    let ck = cache_key(&[
        "preview",
        key,
        cache_version.as_str(),
        path.as_str(),
        display_key,
        fixed_key,
        max_size_key.as_str(),
        mode.as_str(),
        detail.as_str(),
        if include_stats { "stats" } else { "no-stats" },
    ]);

    if let Some(cached) = ctx.caches.tree.get(&ck) {
        tracing::info!(key = %key, path = %path, "preview requested - CACHE HIT");
        return Ok(Json(with_envelope(cached, true, &cache_version)));
    }

    tracing::info!(key = %key, path = %path, "preview requested - CACHE MISS");
    let hfile = HFile::open(Arc::clone(&ctx.store), key).await?;
    let opts = PreviewOptions { mode, detail, include_stats, max_size };
    let payload = build_preview(&hfile, &path, display_param, fixed_param, &opts).await?;
    ctx.caches.tree.set(&ck, payload.clone());

    Ok(Json(with_envelope(payload, false, &cache_version)))
}

/// Add the response envelope fields to a cached or fresh payload.
fn with_envelope(mut payload: JsonValue, cached: bool, cache_version: &str) -> JsonValue {
    if let Some(map) = payload.as_object_mut() {
        map.insert("success".into(), json!(true));
        map.insert("cached".into(), json!(cached));
        map.insert("cache_version".into(), json!(cache_version));
    }
    payload
}

// ---------------------------------------------------------------------------
// Data windows
// ---------------------------------------------------------------------------

/// Dataset info with cache reuse across /preview and /data.
async fn cached_dataset_info(
    ctx: &AppContext,
    key: &str,
    path: &str,
    cache_version: &str,
) -> Result<DatasetInfo, AppError> {
    let ck = cache_key(&["dataset", key, cache_version, path]);
    if let Some(value) = ctx.caches.dataset.get(&ck) {
        if let Ok(info) = serde_json::from_value(value) {
            return Ok(info);
        }
    }
    let hfile = HFile::open(Arc::clone(&ctx.store), key).await?;
    let info = hfile.dataset_info(path).await?;
    let value = serde_json::to_value(&info).map_err(|e| AppError::Internal(e.to_string()))?;
    ctx.caches.dataset.set(&ck, value);
    Ok(info)
}

async fn data_window(
    ctx: AppContext,
    key: &str,
    params: &Params,
) -> Result<Json<JsonValue>, AppError> {
    let path = require_param(params, "path")?.to_string();
    let mode = DataMode::parse(require_param(params, "mode")?)?;

    let cache_version = resolve_cache_version(params);
    let args_key = canonical_args(params);
    let ck = cache_key(&["data", key, cache_version.as_str(), args_key.as_str()]);
    if let Some(cached) = ctx.caches.data.get(&ck) {
        tracing::info!(key = %key, path = %path, mode = mode.as_str(), "data requested - CACHE HIT");
        return Ok(Json(with_envelope(cached, true, &cache_version)));
    }

    let info = cached_dataset_info(&ctx, key, &path, &cache_version).await?;
    let selection = normalize_selection(
        &info.shape,
        param(params, "display_dims"),
        param(params, "fixed_indices"),
    )?;

    if matches!(mode, DataMode::Matrix | DataMode::Heatmap)
        && (selection.display_dims.is_none() || info.ndim < 2)
    {
        return Err(AppError::InvalidSelection(
            "Mode requires a 2D or higher dataset".into(),
        ));
    }

    let hfile = HFile::open(Arc::clone(&ctx.store), key).await?;
    let node = hfile.dataset(&path).await?;

    let payload = match mode {
        DataMode::Matrix => {
            let matrix_params = parse_matrix_params(params)?;
            let plan = plan::plan_matrix(&info.shape, &selection, matrix_params)?;
            let window = data::matrix_window(&hfile, &node, &selection, &plan).await?;
            json!({
                "success": true,
                "key": key,
                "path": path,
                "mode": "matrix",
                "dtype": window["dtype"],
                "data": window["data"],
                "shape": window["shape"],
                "source_shape": info.shape,
                "source_ndim": info.ndim,
                "display_dims": display_json(selection.display_dims),
                "fixed_indices": fixed_json(&selection.fixed_indices),
                "row_offset": window["row_offset"],
                "col_offset": window["col_offset"],
                "downsample_info": window["downsample_info"],
            })
        }
        DataMode::Heatmap => {
            let requested_max_size =
                parse_usize("max_size", param(params, "max_size"), DEFAULT_MAX_SIZE, 1)?;
            let include_stats = parse_bool("include_stats", param(params, "include_stats"), true)?;
            let plan = plan::plan_heatmap(&info.shape, &selection, requested_max_size)?;
            let window =
                data::heatmap_window(&hfile, &node, &selection, &plan, include_stats).await?;
            json!({
                "success": true,
                "key": key,
                "path": path,
                "mode": "heatmap",
                "dtype": window["dtype"],
                "data": window["data"],
                "shape": window["shape"],
                "source_shape": info.shape,
                "source_ndim": info.ndim,
                "display_dims": display_json(selection.display_dims),
                "fixed_indices": fixed_json(&selection.fixed_indices),
                "stats": window["stats"],
                "row_offset": window["row_offset"],
                "col_offset": window["col_offset"],
                "downsample_info": window["downsample_info"],
                "sampled": window["sampled"],
                "requested_max_size": plan.requested_max_size,
                "effective_max_size": plan.effective_max_size,
                "max_size_clamped": plan.max_size_clamped,
            })
        }
        DataMode::Line => {
            let line_params = parse_line_params(params, info.ndim)?;
            let plan = plan::plan_line(&info.shape, &selection, line_params)?;
            let window = data::line_window(&hfile, &node, &plan).await?;
            json!({
                "success": true,
                "key": key,
                "path": path,
                "mode": "line",
                "dtype": window["dtype"],
                "data": window["data"],
                "shape": window["shape"],
                "source_shape": info.shape,
                "source_ndim": info.ndim,
                "display_dims": display_json(plan.display_dims),
                "fixed_indices": fixed_json(&plan.response_fixed),
                "axis": window["axis"],
                "index": window["index"],
                "quality_requested": plan.quality_requested.as_str(),
                "quality_applied": plan.quality_applied,
                "line_offset": plan.offset,
                "line_limit": plan.limit,
                "requested_points": plan.requested_points,
                "returned_points": window["returned_points"],
                "line_step": plan.step,
                "downsample_info": window["downsample_info"],
            })
        }
    };

    ctx.caches.data.set(&ck, payload.clone());
    tracing::info!(key = %key, path = %path, mode = mode.as_str(), "data requested - CACHE MISS");
    Ok(Json(with_envelope(payload, false, &cache_version)))
}

fn parse_matrix_params(params: &Params) -> Result<MatrixParams, AppError> {
    Ok(MatrixParams {
        row_offset: parse_usize("row_offset", param(params, "row_offset"), 0, 0)?,
        col_offset: parse_usize("col_offset", param(params, "col_offset"), 0, 0)?,
        row_limit: parse_usize("row_limit", param(params, "row_limit"), DEFAULT_ROW_LIMIT, 1)?,
        col_limit: parse_usize("col_limit", param(params, "col_limit"), DEFAULT_COL_LIMIT, 1)?,
        row_step: parse_usize("row_step", param(params, "row_step"), 1, 1)?,
        col_step: parse_usize("col_step", param(params, "col_step"), 1, 1)?,
    })
}

fn parse_line_params(params: &Params, ndim: usize) -> Result<LineParams, AppError> {
    let line_dim = match param(params, "line_dim") {
        None => None,
        Some(raw) => Some(selection::parse_line_dim(raw, ndim)?),
    };
    let max_points = parse_opt_usize("max_points", param(params, "max_points"), 1)?
        .unwrap_or(MAX_LINE_POINTS)
        .min(MAX_LINE_POINTS);
    Ok(LineParams {
        line_dim,
        line_index: parse_opt_usize("line_index", param(params, "line_index"), 0)?,
        line_offset: parse_usize("line_offset", param(params, "line_offset"), 0, 0)?,
        line_limit: parse_opt_usize("line_limit", param(params, "line_limit"), 1)?,
        quality: LineQuality::parse(param(params, "quality"))?,
        max_points,
    })
}

fn display_json(display: Option<(usize, usize)>) -> JsonValue {
    match display {
        Some((r, c)) => json!([r, c]),
        None => JsonValue::Null,
    }
}

fn fixed_json(fixed: &BTreeMap<usize, usize>) -> JsonValue {
    let map: serde_json::Map<String, JsonValue> =
        fixed.iter().map(|(dim, idx)| (dim.to_string(), JsonValue::from(*idx))).collect();
    JsonValue::Object(map)
}

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

/// Export a bounded matrix window as CSV. Same selection semantics and caps
/// as `mode=matrix`.
async fn export_csv(ctx: AppContext, key: &str, params: &Params) -> Result<Response, AppError> {
    let path = require_param(params, "path")?.to_string();
    let with_header = parse_bool("header", param(params, "header"), true)?;

    let hfile = HFile::open(Arc::clone(&ctx.store), key).await?;
    let node = hfile.dataset(&path).await?;
    let shape = node.shape();

    let selection = normalize_selection(
        &shape,
        param(params, "display_dims"),
        param(params, "fixed_indices"),
    )?;
    if selection.display_dims.is_none() {
        return Err(AppError::InvalidSelection(
            "Export requires a 2D or higher dataset".into(),
        ));
    }

    let matrix_params = parse_matrix_params(params)?;
    let plan = plan::plan_matrix(&shape, &selection, matrix_params)?;
    let body = data::matrix_csv(&hfile, &node, &selection, &plan, with_header).await?;

    tracing::info!(key = %key, path = %path, rows = plan.out_rows, cols = plan.out_cols, "exported CSV window");
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response())
}
