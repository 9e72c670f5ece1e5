//! 视频三维重建服务客户端
//!
//! 服务端的整数状态码只在本模块内翻译，对外只暴露 [`ReconstructionStatus`]。

use crate::connectors::{add_auth_headers, build_client, parse_json, AuthenticationConfig};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use scanahead_core::utils::resolve_video_extension;
use scanahead_core::{JobHandle, ReconstructionStatus, Result, ScanAheadError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// 重建参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionOptions {
    pub model_quality: u8,
    pub texture_quality: u8,
    pub is_mask: u8,
    pub texture_smoothing: u8,
    pub file_format: String,
}

impl Default for ReconstructionOptions {
    fn default() -> Self {
        Self {
            model_quality: 1,
            texture_quality: 1,
            is_mask: 1,
            texture_smoothing: 1,
            file_format: "glb".to_string(),
        }
    }
}

/// 三维重建服务
#[async_trait]
pub trait ReconstructionService: Send + Sync {
    /// 上传视频并启动任务
    async fn start_job(
        &self,
        video: Bytes,
        mime_type: &str,
        options: &ReconstructionOptions,
    ) -> Result<JobHandle>;

    /// 查询一次任务状态
    async fn poll_status(&self, job: &JobHandle) -> Result<ReconstructionStatus>;

    /// 获取结果压缩包的下载地址
    async fn fetch_result_location(&self, job: &JobHandle) -> Result<String>;
}

/// 服务端状态码翻译
pub fn status_from_code(code: i64) -> ReconstructionStatus {
    match code {
        -1 => ReconstructionStatus::Uploading,
        0 => ReconstructionStatus::Processing,
        1 => ReconstructionStatus::Failed,
        2 => ReconstructionStatus::Succeeded,
        3 => ReconstructionStatus::Queued,
        4 => ReconstructionStatus::Expired,
        _ => ReconstructionStatus::Unknown,
    }
}

/// 重建服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KiriConfig {
    pub base_url: String,
    /// 服务端持有的令牌，不下发给客户端
    pub api_key: String,
    pub timeout_secs: u64,
    pub video_upload_path: String,
    pub status_path: String,
    pub model_zip_path: String,
    pub options: ReconstructionOptions,
}

impl Default for KiriConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.kiriengine.app/api".to_string(),
            api_key: String::new(),
            timeout_secs: 120,
            video_upload_path: "/v1/open/photo/video".to_string(),
            status_path: "/v1/open/model/getStatus".to_string(),
            model_zip_path: "/v1/open/model/getModelZip".to_string(),
            options: ReconstructionOptions::default(),
        }
    }
}

impl KiriConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

/// 响应信封 `{code, msg, ok, data}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: Option<i64>,
    msg: Option<String>,
    ok: Option<bool>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn describe(&self) -> String {
        format!(
            "code={} msg={}",
            self.code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            self.msg.as_deref().unwrap_or("-")
        )
    }

    fn rejected(&self) -> bool {
        self.ok == Some(false)
    }
}

#[derive(Debug, Deserialize)]
struct UploadData {
    serialize: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelZipData {
    model_url: Option<String>,
}

/// KIRI 视频重建客户端
pub struct KiriClient {
    client: reqwest::Client,
    config: KiriConfig,
    auth: AuthenticationConfig,
}

impl KiriClient {
    pub fn new(config: KiriConfig) -> Result<Self> {
        let client = build_client(Duration::from_secs(config.timeout_secs))
            .map_err(|e| ScanAheadError::Config(format!("{:#}", e)))?;
        let auth = AuthenticationConfig::BearerToken {
            token: config.api_key.clone(),
        };
        Ok(Self {
            client,
            config,
            auth,
        })
    }

    pub fn options(&self) -> &ReconstructionOptions {
        &self.config.options
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        job: &JobHandle,
    ) -> anyhow::Result<Envelope<T>> {
        let request = self
            .client
            .get(self.url(path))
            .query(&[("serialize", job.as_str())]);
        let response = add_auth_headers(request, &self.auth).send().await?;
        parse_json(response).await
    }

    async fn upload(
        &self,
        video: Bytes,
        mime_type: &str,
        options: &ReconstructionOptions,
    ) -> anyhow::Result<Envelope<UploadData>> {
        let file_name = format!("case-video.{}", resolve_video_extension(mime_type));
        let mut part = Part::stream(video).file_name(file_name);
        if !mime_type.trim().is_empty() {
            part = part.mime_str(mime_type)?;
        }

        let form = Form::new()
            .part("videoFile", part)
            .text("modelQuality", options.model_quality.to_string())
            .text("textureQuality", options.texture_quality.to_string())
            .text("isMask", options.is_mask.to_string())
            .text("textureSmoothing", options.texture_smoothing.to_string())
            .text("fileFormat", options.file_format.clone());

        let request = self
            .client
            .post(self.url(&self.config.video_upload_path))
            .multipart(form);
        let response = add_auth_headers(request, &self.auth).send().await?;
        parse_json(response).await
    }
}

#[async_trait]
impl ReconstructionService for KiriClient {
    async fn start_job(
        &self,
        video: Bytes,
        mime_type: &str,
        options: &ReconstructionOptions,
    ) -> Result<JobHandle> {
        let size = video.len();
        let envelope = self
            .upload(video, mime_type, options)
            .await
            .map_err(|e| ScanAheadError::JobStart(format!("{:#}", e)))?;

        let serialize = envelope
            .data
            .as_ref()
            .and_then(|data| data.serialize.as_deref())
            .filter(|serialize| !serialize.is_empty())
            .ok_or_else(|| ScanAheadError::JobStart(format!("响应缺少任务编号 ({})", envelope.describe())))?;

        info!("Reconstruction job {} started ({} bytes of video)", serialize, size);
        Ok(JobHandle::new(serialize))
    }

    async fn poll_status(&self, job: &JobHandle) -> Result<ReconstructionStatus> {
        let envelope: Envelope<StatusData> = self
            .query(&self.config.status_path, job)
            .await
            .map_err(|e| ScanAheadError::StatusPoll(format!("{:#}", e)))?;
        if envelope.rejected() {
            return Err(ScanAheadError::StatusPoll(envelope.describe()));
        }

        let status = envelope
            .data
            .and_then(|data| data.status)
            .map(status_from_code)
            .unwrap_or(ReconstructionStatus::Unknown);
        debug!("Reconstruction job {} reported {}", job, status.as_str());
        Ok(status)
    }

    async fn fetch_result_location(&self, job: &JobHandle) -> Result<String> {
        let envelope: Envelope<ModelZipData> = self
            .query(&self.config.model_zip_path, job)
            .await
            .map_err(|e| ScanAheadError::ArchiveFetch(format!("{:#}", e)))?;
        if envelope.rejected() {
            return Err(ScanAheadError::ArchiveFetch(envelope.describe()));
        }

        envelope
            .data
            .and_then(|data| data.model_url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ScanAheadError::ModelNotReady(format!("任务 {} 尚无模型下载地址", job)))
    }
}
