//! 错误定义模块

use thiserror::Error;

/// 病例采集系统统一错误类型
///
/// 按管线阶段划分：校验失败在任何网络调用之前返回；上传失败终止整个提交；
/// 增强阶段（转写/摘要）的失败只在增强管线内部记录，不会继续向上传播；
/// 状态查询与模型下载失败可重试，且不会破坏已存储的终态。
#[derive(Error, Debug)]
pub enum ScanAheadError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("上传失败: {0}")]
    Upload(String),

    #[error("增强处理失败: {0}")]
    Enrichment(String),

    #[error("无法启动三维重建任务: {0}")]
    JobStart(String),

    #[error("无法获取重建状态: {0}")]
    StatusPoll(String),

    #[error("无法下载模型压缩包: {0}")]
    ArchiveFetch(String),

    #[error("压缩包解析失败: {0}")]
    Extraction(String),

    #[error("模型尚未就绪: {0}")]
    ModelNotReady(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

impl ScanAheadError {
    /// 是否属于用户可以直接重试的失败（状态查询、下载模型）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanAheadError::StatusPoll(_)
                | ScanAheadError::ArchiveFetch(_)
                | ScanAheadError::Extraction(_)
                | ScanAheadError::ModelNotReady(_)
                | ScanAheadError::NotFound(_)
        )
    }

    /// 是否会终止一次提交
    pub fn is_fatal_to_submission(&self) -> bool {
        !matches!(self, ScanAheadError::Enrichment(_))
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for ScanAheadError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ScanAheadError::NotFound("记录不存在".to_string()),
            other => ScanAheadError::Database(other.to_string()),
        }
    }
}

/// 病例采集系统统一结果类型
pub type Result<T> = std::result::Result<T, ScanAheadError>;
