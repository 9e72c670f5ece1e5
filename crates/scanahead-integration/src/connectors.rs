//! 外部服务连接公共部分
//!
//! 认证头、超时和响应状态检查在所有外部调用之间共享。

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// 认证配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthenticationConfig {
    #[default]
    None,
    BasicAuth { username: String, password: String },
    ApiKey { key: String, header: Option<String> },
    BearerToken { token: String },
}

/// 添加认证头
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    auth: &AuthenticationConfig,
) -> reqwest::RequestBuilder {
    match auth {
        AuthenticationConfig::None => request,
        AuthenticationConfig::BasicAuth { username, password } => {
            request.basic_auth(username, Some(password))
        }
        AuthenticationConfig::ApiKey { key, header } => {
            let header_name = header.as_deref().unwrap_or("X-API-Key");
            request.header(header_name, key)
        }
        AuthenticationConfig::BearerToken { token } => request.bearer_auth(token),
    }
}

/// 单个外部 HTTP 服务的配置
///
/// 未设置 `endpoint` 视为未配置，对应的处理阶段会被跳过。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpCollaboratorConfig {
    pub endpoint: Option<String>,
    pub authentication: AuthenticationConfig,
    /// 请求超时（秒）
    pub timeout_secs: u64,
    /// 附加的表单字段（仅 multipart 请求使用）
    pub form_fields: BTreeMap<String, String>,
}

impl Default for HttpCollaboratorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            authentication: AuthenticationConfig::None,
            timeout_secs: 60,
            form_fields: BTreeMap::new(),
        }
    }
}

impl HttpCollaboratorConfig {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint
            .as_deref()
            .map(|endpoint| !endpoint.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 构建带超时的 HTTP 客户端
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// 非 2xx 响应转为带状态码和响应体的错误
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(anyhow!("HTTP {}: {}", status.as_u16(), body));
    }
    Ok(response)
}

/// 读取成功响应的 JSON
pub async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_controls_configuration() {
        assert!(!HttpCollaboratorConfig::default().is_configured());
        assert!(!HttpCollaboratorConfig::with_endpoint("  ").is_configured());
        assert!(HttpCollaboratorConfig::with_endpoint("http://stt.local").is_configured());
    }

    #[test]
    fn test_auth_headers() {
        let client = reqwest::Client::new();
        let request = add_auth_headers(
            client.get("http://example.com"),
            &AuthenticationConfig::ApiKey {
                key: "secret".to_string(),
                header: Some("xi-api-key".to_string()),
            },
        )
        .build()
        .unwrap();
        assert_eq!(request.headers()["xi-api-key"], "secret");

        let request = add_auth_headers(
            client.get("http://example.com"),
            &AuthenticationConfig::BearerToken {
                token: "tok".to_string(),
            },
        )
        .build()
        .unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer tok");
    }
}
