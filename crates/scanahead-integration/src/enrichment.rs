//! 语音转写与临床摘要服务客户端

use crate::connectors::{
    add_auth_headers, build_client, ensure_success, parse_json, HttpCollaboratorConfig,
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use scanahead_core::utils::VOICE_NOTE_FILE;
use scanahead_core::{ClinicalSummary, PartialClinicalSummary, Result, ScanAheadError};
use serde_json::{json, Value};
use tracing::debug;

/// 语音转文字服务
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(&self, audio: Bytes, mime_type: &str) -> Result<String>;
}

/// 文本摘要服务
#[async_trait]
pub trait SummaryService: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<ClinicalSummary>;
}

/// 基于 HTTP multipart 上传的转写客户端
pub struct HttpTranscriptionClient {
    client: reqwest::Client,
    config: HttpCollaboratorConfig,
    endpoint: String,
}

impl HttpTranscriptionClient {
    /// 未配置 endpoint 时返回 `None`
    pub fn from_config(config: &HttpCollaboratorConfig) -> Result<Option<Self>> {
        let endpoint = match &config.endpoint {
            Some(endpoint) if config.is_configured() => endpoint.clone(),
            _ => return Ok(None),
        };
        let client = build_client(config.timeout())
            .map_err(|e| ScanAheadError::Config(format!("{:#}", e)))?;
        Ok(Some(Self {
            client,
            config: config.clone(),
            endpoint,
        }))
    }

    async fn request(&self, audio: Bytes, mime_type: &str) -> anyhow::Result<String> {
        let part = Part::stream(audio)
            .file_name(VOICE_NOTE_FILE)
            .mime_str(mime_type)?;
        let mut form = Form::new().part("file", part);
        for (name, value) in &self.config.form_fields {
            form = form.text(name.clone(), value.clone());
        }

        let request = self.client.post(&self.endpoint).multipart(form);
        let response = add_auth_headers(request, &self.config.authentication)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await?;
        parse_transcript(&content_type, &body)
    }
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionClient {
    async fn transcribe(&self, audio: Bytes, mime_type: &str) -> Result<String> {
        debug!("Sending {} bytes of audio for transcription", audio.len());
        self.request(audio, mime_type)
            .await
            .map_err(|e| ScanAheadError::Enrichment(format!("转写失败: {:#}", e)))
    }
}

/// 解析转写服务的响应
///
/// JSON 响应可以是字符串本身，或带 `text` / `transcription` 字段的对象；
/// 其他内容类型按纯文本处理。
pub fn parse_transcript(content_type: &str, body: &[u8]) -> anyhow::Result<String> {
    if !content_type.contains("application/json") {
        return Ok(String::from_utf8_lossy(body).into_owned());
    }

    let value: Value = serde_json::from_slice(body).context("invalid JSON transcription")?;
    match &value {
        Value::String(text) => Ok(text.clone()),
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .or_else(|| map.get("transcription").and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| anyhow!("unexpected JSON transcription response")),
        _ => Err(anyhow!("unexpected JSON transcription response")),
    }
}

/// 基于 HTTP JSON 的摘要客户端
pub struct HttpSummaryClient {
    client: reqwest::Client,
    config: HttpCollaboratorConfig,
    endpoint: String,
}

impl HttpSummaryClient {
    /// 未配置 endpoint 时返回 `None`
    pub fn from_config(config: &HttpCollaboratorConfig) -> Result<Option<Self>> {
        let endpoint = match &config.endpoint {
            Some(endpoint) if config.is_configured() => endpoint.clone(),
            _ => return Ok(None),
        };
        let client = build_client(config.timeout())
            .map_err(|e| ScanAheadError::Config(format!("{:#}", e)))?;
        Ok(Some(Self {
            client,
            config: config.clone(),
            endpoint,
        }))
    }

    async fn request(&self, text: &str) -> anyhow::Result<ClinicalSummary> {
        let request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "text": text }));
        let response = add_auth_headers(request, &self.config.authentication)
            .send()
            .await?;
        let partial: PartialClinicalSummary = parse_json(response).await?;
        Ok(ClinicalSummary::from(partial))
    }
}

#[async_trait]
impl SummaryService for HttpSummaryClient {
    async fn summarize(&self, text: &str) -> Result<ClinicalSummary> {
        self.request(text)
            .await
            .map_err(|e| ScanAheadError::Enrichment(format!("摘要失败: {:#}", e)))
    }
}
