//! # ScanAhead管理模块
//!
//! 提供配置加载、日志初始化和Prometheus指标等运维功能

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{AppConfig, DraftConfig, ProxyConfig, ServerConfig};
pub use logging::{init_logging, LoggingConfig};
pub use metrics::Metrics;
