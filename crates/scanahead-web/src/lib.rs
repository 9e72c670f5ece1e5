//! # ScanAhead Web模块
//!
//! 对外HTTP接口：病例提交与审核、三维模型状态与下载、模型压缩包下载代理、语音转写代理

pub mod handlers;
pub mod proxy;
pub mod server;

pub use handlers::ApiError;
pub use proxy::ProxyState;
pub use server::{AppState, WebServer};
