//! 同源代理
//!
//! 浏览器无法直接跨域下载重建服务的压缩包，也不能持有转写服务的密钥，
//! 两者都经由本服务转发。

use crate::handlers::ApiError;
use crate::server::AppState;
use axum::{
    body::Body,
    extract::{Multipart, Query, State},
    http::header,
    response::{IntoResponse, Json, Response},
};
use scanahead_admin::ProxyConfig;
use scanahead_core::utils::VOICE_NOTE_FILE;
use scanahead_core::ScanAheadError;
use scanahead_integration::{HttpTranscriptionClient, TranscriptionService};
use serde::Deserialize;
use reqwest::redirect::Policy;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_REDIRECTS: usize = 5;

/// 代理共享状态
pub struct ProxyState {
    config: ProxyConfig,
    client: reqwest::Client,
    transcriber: Option<HttpTranscriptionClient>,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> anyhow::Result<Self> {
        if config.allowed_hosts.is_empty() {
            warn!("proxy.allowed_hosts is empty, model downloads will be refused");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(redirect_policy(config.clone()))
            .build()?;
        let transcriber = HttpTranscriptionClient::from_config(&config.transcription)?;
        if transcriber.is_none() {
            info!("Transcription proxy upstream not configured");
        }
        Ok(Self {
            config,
            client,
            transcriber,
        })
    }

    /// 校验下载地址
    ///
    /// 只接受白名单中主机的 http(s) 地址。
    pub fn validate_target(&self, raw: Option<&str>) -> Result<reqwest::Url, ApiError> {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Err(ApiError::bad_request("缺少 url 参数")),
        };
        let url = reqwest::Url::parse(raw)
            .map_err(|e| ApiError::bad_request(format!("无效的 url: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::bad_request("只允许 http(s) 地址"));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ApiError::bad_request("url 缺少主机名"))?;
        if !self.config.host_allowed(host) {
            return Err(ApiError::forbidden(format!("不允许的下载主机: {}", host)));
        }
        Ok(url)
    }
}

/// 每一跳重定向都要重新检查白名单
fn redirect_policy(config: ProxyConfig) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let allowed = matches!(attempt.url().scheme(), "http" | "https")
            && attempt
                .url()
                .host_str()
                .is_some_and(|host| config.host_allowed(host));
        if allowed {
            attempt.follow()
        } else {
            warn!("Refusing redirect to {}", attempt.url());
            attempt.stop()
        }
    })
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub url: Option<String>,
}

/// 下载代理：`GET /api/reconstruction/download-zip?url=...`
pub async fn download_zip(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let target = state
        .proxy
        .validate_target(query.url.as_deref())
        .map_err(|e| {
            state.metrics.record_proxy_download("rejected");
            e
        })?;
    info!(
        "Proxying model archive from {}",
        target.host_str().unwrap_or_default()
    );

    let upstream = state
        .proxy
        .client
        .get(target)
        .send()
        .await
        .map_err(|e| {
            state.metrics.record_proxy_download("failed");
            ApiError::bad_gateway(format!("下载失败: {}", e))
        })?;

    if upstream.status().is_redirection() {
        state.metrics.record_proxy_download("rejected");
        return Err(ApiError::bad_gateway(format!(
            "上游重定向到不允许的地址 ({})",
            upstream.status().as_u16()
        )));
    }
    if !upstream.status().is_success() {
        state.metrics.record_proxy_download("failed");
        return Err(ApiError::bad_gateway(format!(
            "上游返回状态 {}",
            upstream.status().as_u16()
        )));
    }
    if let Some(length) = upstream.content_length() {
        debug!("Upstream archive is {} bytes", length);
    }

    state.metrics.record_proxy_download("streamed");
    let body = Body::from_stream(upstream.bytes_stream());
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"model.zip\""),
        ],
        body,
    )
        .into_response())
}

/// 转写代理：`POST /api/transcribe`，表单字段 `file`
pub async fn transcribe(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let transcriber = state
        .proxy
        .transcriber
        .as_ref()
        .ok_or_else(|| ScanAheadError::Config("转写服务未配置".to_string()))?;

    let mut audio = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("无法解析表单: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let mime_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "audio/webm".to_string());
        let file_name = field.file_name().unwrap_or(VOICE_NOTE_FILE).to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("无法读取音频: {}", e)))?;
        debug!("Received {} ({} bytes, {})", file_name, bytes.len(), mime_type);
        audio = Some((bytes, mime_type));
        break;
    }

    let (bytes, mime_type) = audio
        .ok_or_else(|| ScanAheadError::Validation("file: 缺少音频文件".to_string()))?;
    if bytes.is_empty() {
        return Err(ScanAheadError::Validation("file: 音频为空".to_string()).into());
    }

    let text = transcriber
        .transcribe(bytes, &mime_type)
        .await
        .map_err(|e| {
            warn!("Transcription proxy failed: {}", e);
            ApiError::from(e)
        })?;

    Ok(Json(json!({ "text": text })).into_response())
}
