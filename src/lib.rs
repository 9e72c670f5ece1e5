//! # ScanAhead
//!
//! 患者病例采集管线：本地草稿、媒体上传、语音转写与摘要、
//! 视频三维重建和病例记录写入。各子模块的入口在此统一导出。

pub use scanahead_admin as admin;
pub use scanahead_core as core;
pub use scanahead_database as database;
pub use scanahead_integration as integration;
pub use scanahead_storage as storage;
pub use scanahead_workflow as workflow;
