//! 模型压缩包下载

use crate::connectors::{build_client, ensure_success};
use async_trait::async_trait;
use bytes::Bytes;
use scanahead_core::{Result, ScanAheadError};
use std::time::Duration;
use tracing::debug;

/// 按地址下载压缩包
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch_archive(&self, url: &str) -> Result<Bytes>;
}

/// 经同源下载代理获取压缩包：`GET {proxy_url}?url=<编码后的地址>`
pub struct ProxyArchiveFetcher {
    client: reqwest::Client,
    proxy_url: String,
}

impl ProxyArchiveFetcher {
    pub fn new(proxy_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = build_client(timeout).map_err(|e| ScanAheadError::Config(format!("{:#}", e)))?;
        Ok(Self {
            client,
            proxy_url: proxy_url.into(),
        })
    }

    async fn download(&self, url: &str) -> anyhow::Result<Bytes> {
        let response = self
            .client
            .get(&self.proxy_url)
            .query(&[("url", url)])
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl ArchiveFetcher for ProxyArchiveFetcher {
    async fn fetch_archive(&self, url: &str) -> Result<Bytes> {
        let bytes = self
            .download(url)
            .await
            .map_err(|e| ScanAheadError::ArchiveFetch(format!("{:#}", e)))?;
        debug!("Fetched {} byte archive through proxy", bytes.len());
        Ok(bytes)
    }
}
