//! # ScanAhead数据库模块
//!
//! 负责预约与病例提交记录的存储，提供PostgreSQL实现和进程内实现。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;
pub mod records;

// 重新导出主要类型
pub use connection::{DatabaseConfig, DatabasePool};
pub use memory::MemoryCaseRecords;
pub use models::*;
pub use queries::DatabaseQueries;
pub use records::{AttachOutcome, CaseIds, CaseRecords, PgCaseRecords};
