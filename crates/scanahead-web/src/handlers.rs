//! HTTP处理器

use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use scanahead_core::{Appointment, AppointmentStatus, CaseSubmission, Draft, ScanAheadError};
use scanahead_workflow::{CaseModelState, ResolvedModel, SubmissionReceipt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 接口错误
///
/// 响应体为 `{error, message, status}`。
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "upstream", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ScanAheadError> for ApiError {
    fn from(err: ScanAheadError) -> Self {
        let (status, kind) = match &err {
            ScanAheadError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            ScanAheadError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ScanAheadError::ModelNotReady(_) => (StatusCode::CONFLICT, "model_not_ready"),
            ScanAheadError::InvalidStateTransition { .. } => (StatusCode::CONFLICT, "invalid_state"),
            ScanAheadError::Upload(_) => (StatusCode::BAD_GATEWAY, "upload"),
            ScanAheadError::Enrichment(_) => (StatusCode::BAD_GATEWAY, "enrichment"),
            ScanAheadError::JobStart(_) => (StatusCode::BAD_GATEWAY, "job_start"),
            ScanAheadError::StatusPoll(_) => (StatusCode::BAD_GATEWAY, "status_poll"),
            ScanAheadError::ArchiveFetch(_) => (StatusCode::BAD_GATEWAY, "archive_fetch"),
            ScanAheadError::Extraction(_) => (StatusCode::BAD_GATEWAY, "extraction"),
            ScanAheadError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
            ScanAheadError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database"),
            ScanAheadError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            ScanAheadError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialization"),
            ScanAheadError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io"),
            ScanAheadError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self::new(status, kind, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed ({}): {}", self.kind, self.message);
        } else {
            warn!("Request rejected ({}): {}", self.kind, self.message);
        }

        let body = Json(json!({
            "error": self.kind,
            "message": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "ScanAhead API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "metrics": "/metrics",
            "cases": "/api/v1/cases",
            "download_proxy": "/api/reconstruction/download-zip",
            "transcribe": "/api/transcribe"
        }
    }))
}

/// 健康检查处理器
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.metrics.uptime().as_secs()
    }))
}

/// Prometheus指标
pub async fn metrics(State(state): State<AppState>) -> ApiResult<Response> {
    let text = state
        .metrics
        .render()
        .map_err(|e| ApiError::from(ScanAheadError::Internal(e.to_string())))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}

/// 提交请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCaseRequest {
    pub patient_id: Uuid,
    pub draft: Draft,
}

/// 提交病例
pub async fn create_case(
    State(state): State<AppState>,
    Json(request): Json<CreateCaseRequest>,
) -> ApiResult<(StatusCode, Json<SubmissionReceipt>)> {
    info!("Case submission received for patient {}", request.patient_id);

    match state.submissions.submit(request.patient_id, &request.draft).await {
        Ok(receipt) => {
            state.metrics.record_submission("created");
            state
                .metrics
                .record_enrichment(receipt.transcription_state.as_str());
            Ok((StatusCode::CREATED, Json(receipt)))
        }
        Err(e) => {
            let outcome = match &e {
                ScanAheadError::Validation(_) => "rejected",
                _ => "failed",
            };
            state.metrics.record_submission(outcome);
            Err(e.into())
        }
    }
}

/// 病例详情
#[derive(Debug, Serialize)]
pub struct CaseView {
    pub appointment: Appointment,
    pub submission: Option<CaseSubmission>,
    pub transcription: Option<String>,
    pub model_state: Option<CaseModelState>,
    pub model_label: Option<&'static str>,
}

/// 查看病例
pub async fn get_case(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> ApiResult<Json<CaseView>> {
    let detail = state
        .records
        .get_case(&appointment_id)
        .await?
        .ok_or_else(|| ScanAheadError::NotFound(format!("预约不存在: {}", appointment_id)))?;

    let (transcription, model_state) = match &detail.submission {
        Some(submission) => (
            Some(submission.transcription_display().to_string()),
            Some(state.resolver.current_state(submission).await),
        ),
        None => (None, None),
    };

    Ok(Json(CaseView {
        appointment: detail.appointment,
        submission: detail.submission,
        transcription,
        model_label: model_state.map(|s| s.label()),
        model_state,
    }))
}

/// 模型状态
#[derive(Debug, Serialize)]
pub struct ModelStatusView {
    pub submission_id: Uuid,
    pub state: CaseModelState,
    pub label: &'static str,
    pub terminal: bool,
}

/// 查询一次重建状态
pub async fn check_model_status(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
) -> ApiResult<Json<ModelStatusView>> {
    let current = state.resolver.check_status(&submission_id).await?;
    state.metrics.record_status_check(current.label());

    Ok(Json(ModelStatusView {
        submission_id,
        state: current,
        label: current.label(),
        terminal: current.is_terminal(),
    }))
}

/// 获取并保存三维模型
pub async fn resolve_model(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
) -> ApiResult<Json<ResolvedModel>> {
    match state.resolver.resolve_model(&submission_id).await {
        Ok(resolved) => {
            let outcome = if resolved.short_circuited {
                "short_circuited"
            } else {
                "stored"
            };
            state.metrics.record_model_resolution(outcome);
            Ok(Json(resolved))
        }
        Err(e) => {
            state.metrics.record_model_resolution("failed");
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// 审核人员修改预约状态
pub async fn update_appointment_status(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<impl IntoResponse> {
    let status = AppointmentStatus::parse(&update.status).ok_or_else(|| {
        ScanAheadError::Validation(format!("status: 未知的预约状态 {}", update.status))
    })?;
    state
        .records
        .update_appointment_status(&appointment_id, status)
        .await?;
    info!("Appointment {} moved to {}", appointment_id, status.as_str());

    Ok(Json(json!({
        "appointment_id": appointment_id,
        "status": status.as_str()
    })))
}

#[derive(Debug, Deserialize)]
pub struct NotesUpdate {
    pub notes: String,
}

/// 保存医生备注
pub async fn save_doctor_notes(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
    Json(update): Json<NotesUpdate>,
) -> ApiResult<impl IntoResponse> {
    state
        .records
        .save_doctor_notes(&submission_id, &update.notes)
        .await?;

    Ok(Json(json!({
        "submission_id": submission_id,
        "saved": true
    })))
}
