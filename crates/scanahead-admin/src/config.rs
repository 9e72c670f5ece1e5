//! 配置管理
//!
//! 默认值 → 可选配置文件 → `SCANAHEAD_*` 环境变量，逐层覆盖。
//! 嵌套字段用双下划线分隔，例如 `SCANAHEAD_SERVER__PORT=8080`；
//! 列表字段用逗号分隔，例如 `SCANAHEAD_PROXY__ALLOWED_HOSTS=cdn.example.com,models.example.com`。

use crate::logging::LoggingConfig;
use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use scanahead_database::DatabaseConfig;
use scanahead_integration::{HttpCollaboratorConfig, KiriConfig};
use scanahead_storage::{DraftSession, FileDraftStore, StorageConfig};
use scanahead_workflow::ValidationRules;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置，缺省时使用进程内记录
    pub database: Option<DatabaseConfig>,
    /// 对象存储配置
    pub storage: StorageConfig,
    /// 语音转写服务
    pub transcription: HttpCollaboratorConfig,
    /// 临床摘要服务
    pub summary: HttpCollaboratorConfig,
    /// 三维重建服务
    pub reconstruction: KiriConfig,
    /// 下载代理与转写代理
    pub proxy: ProxyConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 草稿存储
    pub draft: DraftConfig,
    /// 提交校验规则
    pub validation: ValidationRules,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 对外访问地址，用于拼接同源代理地址
    pub public_url: Option<String>,
    /// 允许跨域访问的来源，为空时允许任意来源
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            public_url: None,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 服务自身的基础地址
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = if self.host == "0.0.0.0" { "127.0.0.1" } else { &self.host };
                format!("http://{}:{}", host, self.port)
            }
        }
    }
}

/// 代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// 允许下载的主机，为空时拒绝所有下载
    pub allowed_hosts: Vec<String>,
    /// 下载超时（秒）
    pub timeout_secs: u64,
    /// 转写代理的上游服务
    pub transcription: HttpCollaboratorConfig,
    /// 模型下载使用的代理地址，缺省为本服务的下载接口
    pub download_url: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            timeout_secs: 120,
            transcription: HttpCollaboratorConfig::default(),
            download_url: None,
        }
    }
}

impl ProxyConfig {
    /// 主机是否在白名单中，不区分大小写
    pub fn host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts
            .iter()
            .any(|allowed| allowed.trim().eq_ignore_ascii_case(host))
    }

    /// 模型下载代理地址
    pub fn download_endpoint(&self, server: &ServerConfig) -> String {
        match &self.download_url {
            Some(url) => url.clone(),
            None => format!("{}/api/reconstruction/download-zip", server.base_url()),
        }
    }
}

/// 草稿存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    /// 草稿文件目录
    pub dir: PathBuf,
    /// 草稿键，对应文件 `<dir>/<key>.json`
    pub key: String,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/drafts"),
            key: "newCase".to_string(),
        }
    }
}

impl DraftConfig {
    pub fn store(&self) -> FileDraftStore {
        FileDraftStore::with_key(&self.dir, &self.key)
    }

    /// 打开草稿会话，恢复上次未提交的草稿
    pub async fn open_session(&self) -> DraftSession {
        debug!("Opening draft {} in {}", self.key, self.dir.display());
        DraftSession::open(Arc::new(self.store())).await
    }
}

impl AppConfig {
    /// 加载配置
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_with(config_path, environment())
    }

    fn load_with(config_path: Option<&str>, env: Environment) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default())
            .context("Failed to build default configuration")?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder.add_source(env).build()?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;

        match config_path {
            Some(path) => info!("Configuration loaded from {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 校验必需的配置项
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.server.port == 0 {
            problems.push("server.port must be non-zero".to_string());
        }
        for (name, collaborator) in [
            ("transcription", &self.transcription),
            ("summary", &self.summary),
            ("proxy.transcription", &self.proxy.transcription),
        ] {
            if let Some(endpoint) = &collaborator.endpoint {
                if collaborator.is_configured() && !is_http_url(endpoint) {
                    problems.push(format!("{}.endpoint must be an http(s) URL", name));
                }
            }
            if collaborator.timeout_secs == 0 {
                problems.push(format!("{}.timeout_secs must be non-zero", name));
            }
        }
        if self.reconstruction.is_configured() && !is_http_url(&self.reconstruction.base_url) {
            problems.push("reconstruction.base_url must be an http(s) URL".to_string());
        }
        if self.validation.min_images == 0 || self.validation.min_images > self.validation.max_images {
            problems.push("validation.min_images must be between 1 and max_images".to_string());
        }
        if self.draft.key.trim().is_empty() || self.draft.key.contains(['/', '\\']) {
            problems.push("draft.key must be a plain file name".to_string());
        }
        if let Some(database) = &self.database {
            if database.url.trim().is_empty() {
                problems.push("database.url must be set".to_string());
            }
        }

        if problems.is_empty() {
            return Ok(());
        }
        for problem in &problems {
            error!("Configuration validation failed: {}", problem);
        }
        Err(anyhow!("invalid configuration: {}", problems.join("; ")))
    }
}

/// 列表字段
const LIST_KEYS: [&str; 2] = ["proxy.allowed_hosts", "server.cors_origins"];

fn environment() -> Environment {
    LIST_KEYS.iter().fold(
        Environment::with_prefix("SCANAHEAD")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .try_parsing(true),
        |env, key| env.with_list_parse_key(key),
    )
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}
