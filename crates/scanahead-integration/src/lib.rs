//! # ScanAhead集成模块
//!
//! 封装对外部服务的调用：
//! - 语音转写与临床摘要服务
//! - 视频三维重建服务（提交任务、查询状态、获取模型压缩包地址）
//! - 经同源代理下载模型压缩包

pub mod connectors;
pub mod download;
pub mod enrichment;
pub mod reconstruction;

#[cfg(test)]
pub(crate) mod test_support;

pub use connectors::{AuthenticationConfig, HttpCollaboratorConfig};
pub use download::{ArchiveFetcher, ProxyArchiveFetcher};
pub use enrichment::{
    HttpSummaryClient, HttpTranscriptionClient, SummaryService, TranscriptionService,
};
pub use reconstruction::{
    status_from_code, KiriClient, KiriConfig, ReconstructionOptions, ReconstructionService,
};
