//! # ScanAhead工作流模块
//!
//! 编排病例提交的完整流程：
//! - 草稿校验：任何网络调用之前完成
//! - 提交管线：上传媒体、增强处理、启动三维重建、写入记录
//! - 增强管线：转写与摘要，失败不影响提交
//! - 模型解析：按需查询重建状态，下载并保存三维模型

pub mod enrichment;
pub mod resolution;
pub mod state_machine;
pub mod submission;
pub mod validation;

#[cfg(test)]
pub(crate) mod fakes;

// 重新导出主要类型
pub use enrichment::{EnrichmentOutcome, EnrichmentPipeline};
pub use resolution::{ModelResolver, ResolvedModel};
pub use state_machine::{CaseModelState, ModelEvent, ModelStateMachine};
pub use submission::{SubmissionPipeline, SubmissionReceipt};
pub use validation::{DraftValidator, ValidatedCase, ValidationRules};
