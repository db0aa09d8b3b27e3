use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::Local;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use turnstile_common::Error;
use turnstile_db::MigrationRunner;

use crate::error::ApiError;
use crate::sheet;
use crate::state::SharedState;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(rename = "qrId")]
    pub qr_id: String,
    #[serde(rename = "gatewayId", default)]
    pub gateway_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    #[serde(rename = "gatewayId", default)]
    pub gateway_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterGatewayRequest {
    #[serde(rename = "gatewayId")]
    pub gateway_id: String,
    #[serde(rename = "gatewayName")]
    pub gateway_name: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfigQuery {
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    pub key: String,
    pub value: String,
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Turnstile attendance API is running", "status": "ok" }))
}

pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    let database = state.store.get_config("system_version").is_ok();
    Json(json!({ "status": "healthy", "database": database }))
}

/// Evaluate a presented QR code and record the attempt. Unknown ids are
/// a 404; recognized-but-rejected scans come back 200 with
/// `success: false` since they are ordinary domain outcomes.
pub async fn scan(
    State(state): State<SharedState>,
    Json(req): Json<ScanRequest>,
) -> ApiResult<Json<Value>> {
    let qr_id = req.qr_id.trim();
    if qr_id.is_empty() {
        return Err(Error::MalformedInput("QR ID required".into()).into());
    }
    let gateway_id = req
        .gateway_id
        .as_deref()
        .unwrap_or(&state.config.default_gateway_id);
    require_gateway(&state, gateway_id)?;

    let outcome = state.store.process_scan(qr_id, gateway_id)?;
    if outcome.accepted {
        let global_count = state
            .store
            .valid_scans_today(None, Local::now().date_naive())?;
        Ok(Json(json!({
            "success": true,
            "member": outcome.member,
            "globalCount": global_count,
            "validationMessage": outcome.message,
        })))
    } else {
        Ok(Json(json!({
            "success": false,
            "error": outcome.message,
            "member": outcome.member,
        })))
    }
}

/// Bulk import from an uploaded sheet. Row failures are reported, not
/// fatal; only a structurally broken sheet rejects the request.
pub async fn upload(
    State(state): State<SharedState>,
    Query(query): Query<GatewayQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let gateway_id = query
        .gateway_id
        .unwrap_or_else(|| state.config.default_gateway_id.clone());
    require_gateway(&state, &gateway_id)?;

    let mut file_name = "upload.csv".to_string();
    let mut bytes = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::MalformedInput(format!("broken multipart upload: {e}")))?
    {
        if bytes.is_some() && field.name() != Some("file") {
            continue;
        }
        if let Some(name) = field.file_name() {
            file_name = name.to_string();
        }
        bytes = Some(
            field
                .bytes()
                .await
                .map_err(|e| Error::MalformedInput(format!("broken multipart upload: {e}")))?,
        );
    }
    let bytes = bytes.ok_or_else(|| Error::MalformedInput("no file in upload".to_string()))?;

    let rows = sheet::parse_member_rows(&bytes)?;
    let summary = state.store.import_batch(&rows, &gateway_id, &file_name)?;
    info!(
        "import {}: {} ok, {} failed of {}",
        summary.batch_id, summary.successful, summary.failed, summary.total
    );

    Ok(Json(json!({
        "batchId": summary.batch_id,
        "total": summary.total,
        "successful": summary.successful,
        "failed": summary.failed,
        "errors": summary.errors,
    })))
}

pub async fn upload_history(
    State(state): State<SharedState>,
    Query(query): Query<GatewayQuery>,
) -> ApiResult<Json<Value>> {
    let history = state.store.upload_history(query.gateway_id.as_deref())?;
    Ok(Json(json!({ "history": history })))
}

pub async fn stats(
    State(state): State<SharedState>,
    Query(query): Query<GatewayQuery>,
) -> ApiResult<Json<Value>> {
    let report = state.store.stats(query.gateway_id.as_deref())?;
    Ok(Json(json!({
        "totalMembers": report.total_members,
        "scannedToday": report.scanned_today,
        "members": report.members,
    })))
}

/// Export the current active member set as a CSV attachment.
pub async fn download(State(state): State<SharedState>) -> ApiResult<Response> {
    let members = state.store.active_members(None)?;
    let body = sheet::render_members(&members)?;
    let filename = format!("members_db_{}.csv", Local::now().format("%Y%m%d_%H%M%S"));

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}

pub async fn gateways(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    Ok(Json(json!({ "gateways": state.store.gateways()? })))
}

pub async fn active_gateways(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    Ok(Json(json!({ "gateways": state.store.active_gateways()? })))
}

pub async fn register_gateway(
    State(state): State<SharedState>,
    Json(req): Json<RegisterGatewayRequest>,
) -> ApiResult<Json<Value>> {
    if req.gateway_id.trim().is_empty() || req.gateway_name.trim().is_empty() {
        return Err(Error::MalformedInput("gatewayId and gatewayName required".into()).into());
    }
    state
        .store
        .register_gateway(req.gateway_id.trim(), req.gateway_name.trim(), &req.location)?;
    Ok(Json(json!({
        "message": "Gateway registered successfully",
        "gatewayId": req.gateway_id.trim(),
    })))
}

pub async fn sync_gateway(
    State(state): State<SharedState>,
    Path(gateway_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.store.touch_gateway_sync(&gateway_id)?;
    Ok(Json(json!({ "message": "Sync timestamp updated", "gatewayId": gateway_id })))
}

pub async fn get_config(
    State(state): State<SharedState>,
    Query(query): Query<ConfigQuery>,
) -> ApiResult<Json<Value>> {
    let key = query
        .key
        .ok_or_else(|| Error::MalformedInput("config key required".to_string()))?;
    let value = state
        .store
        .get_config(&key)?
        .ok_or_else(|| Error::NotFound(format!("config entry {key}")))?;
    Ok(Json(json!({ "key": key, "value": value })))
}

pub async fn set_config(
    State(state): State<SharedState>,
    Json(req): Json<SetConfigRequest>,
) -> ApiResult<Json<Value>> {
    if req.key.trim().is_empty() {
        return Err(Error::MalformedInput("config key required".into()).into());
    }
    state.store.set_config(req.key.trim(), &req.value)?;
    Ok(Json(json!({ "message": "Configuration updated", "key": req.key.trim() })))
}

pub async fn version(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let status = MigrationRunner::new(&state.store).status()?;
    Ok(Json(json!({
        "currentVersion": status.current_version,
        "pendingMigrations": status.pending.len(),
        "appliedMigrations": status.history.len(),
        "pending": status.pending,
        "history": status.history,
    })))
}

fn require_gateway(state: &SharedState, gateway_id: &str) -> Result<(), ApiError> {
    state
        .store
        .gateway_by_id(gateway_id)?
        .ok_or_else(|| ApiError(Error::NotFound(format!("gateway {gateway_id}"))))?;
    Ok(())
}
