//! # ScanAhead存储模块
//!
//! 负责病例媒体的对象存储、本地草稿持久化以及重建结果压缩包的解析。

pub mod archive;
pub mod draft;
pub mod storage;

pub use archive::{extract_model, ExtractedModel};
pub use draft::{DraftSession, DraftStore, FileDraftStore, MemoryDraftStore};
pub use storage::{Bucket, BucketNames, StorageBackend, StorageConfig, StorageManager, StoredObject};
