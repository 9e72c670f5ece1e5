//! 病例媒体存储管理
//!
//! 按预约ID组织对象路径，同一预约重复上传会覆盖而不是累积。

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use scanahead_core::utils::{self, GLB_CONTENT_TYPE, MODEL_FILE};
use scanahead_core::{Result, ScanAheadError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// 逻辑存储桶
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Images,
    Audio,
    Video,
    Models,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [Bucket::Images, Bucket::Audio, Bucket::Video, Bucket::Models];
}

/// 各逻辑桶对应的实际桶名
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketNames {
    pub images: String,
    pub audio: String,
    pub video: String,
    pub models: String,
}

impl BucketNames {
    pub fn name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Images => &self.images,
            Bucket::Audio => &self.audio,
            Bucket::Video => &self.video,
            Bucket::Models => &self.models,
        }
    }
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            images: "patient-images".to_string(),
            audio: "voice-notes".to_string(),
            video: "patient-videos".to_string(),
            models: "patient-models".to_string(),
        }
    }
}

/// 存储后端
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageBackend {
    /// 进程内存储，仅用于开发和测试
    Memory,
    /// 本地文件系统，每个桶一个子目录
    Local { root_path: String },
    /// S3 兼容对象存储
    S3 {
        region: String,
        endpoint: Option<String>,
        access_key_id: String,
        secret_access_key: String,
        #[serde(default)]
        allow_http: bool,
    },
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub buckets: BucketNames,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            buckets: BucketNames::default(),
        }
    }
}

/// 已写入的对象
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredObject {
    pub bucket: Bucket,
    pub path: String,
    pub size: usize,
    pub sha256: String,
}

/// 存储管理器
pub struct StorageManager {
    stores: HashMap<Bucket, Arc<dyn ObjectStore>>,
    buckets: BucketNames,
    // 本地文件系统无法保存对象属性
    content_types: bool,
}

impl StorageManager {
    pub async fn new(config: StorageConfig) -> Result<Self> {
        let mut stores: HashMap<Bucket, Arc<dyn ObjectStore>> = HashMap::new();

        for bucket in Bucket::ALL {
            let name = config.buckets.name(bucket);
            let store: Arc<dyn ObjectStore> = match &config.backend {
                StorageBackend::Memory => Arc::new(InMemory::new()),
                StorageBackend::Local { root_path } => {
                    let dir = std::path::Path::new(root_path).join(name);
                    tokio::fs::create_dir_all(&dir).await?;
                    let fs = LocalFileSystem::new_with_prefix(&dir)
                        .map_err(|e| ScanAheadError::Storage(e.to_string()))?;
                    Arc::new(fs)
                }
                StorageBackend::S3 {
                    region,
                    endpoint,
                    access_key_id,
                    secret_access_key,
                    allow_http,
                } => {
                    let mut builder = AmazonS3Builder::new()
                        .with_bucket_name(name)
                        .with_region(region)
                        .with_access_key_id(access_key_id)
                        .with_secret_access_key(secret_access_key)
                        .with_allow_http(*allow_http);
                    if let Some(endpoint) = endpoint {
                        builder = builder.with_endpoint(endpoint);
                    }
                    let s3 = builder
                        .build()
                        .map_err(|e| ScanAheadError::Config(e.to_string()))?;
                    Arc::new(s3)
                }
            };
            stores.insert(bucket, store);
        }

        info!("Storage manager initialised with {} backend", backend_name(&config.backend));

        Ok(Self {
            stores,
            buckets: config.buckets,
            content_types: !matches!(config.backend, StorageBackend::Local { .. }),
        })
    }

    /// 进程内存储
    pub fn in_memory() -> Self {
        let stores = Bucket::ALL
            .into_iter()
            .map(|bucket| (bucket, Arc::new(InMemory::new()) as Arc<dyn ObjectStore>))
            .collect();
        Self {
            stores,
            buckets: BucketNames::default(),
            content_types: true,
        }
    }

    pub fn bucket_name(&self, bucket: Bucket) -> &str {
        self.buckets.name(bucket)
    }

    fn store(&self, bucket: Bucket) -> Result<&Arc<dyn ObjectStore>> {
        self.stores
            .get(&bucket)
            .ok_or_else(|| ScanAheadError::Config(format!("存储桶未配置: {:?}", bucket)))
    }

    fn location(path: &str) -> Result<ObjectPath> {
        ObjectPath::parse(path).map_err(|e| ScanAheadError::Storage(e.to_string()))
    }

    /// 写入对象，显式设置 Content-Type，已存在则覆盖
    pub async fn store_file(
        &self,
        bucket: Bucket,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<StoredObject> {
        let store = self.store(bucket)?;
        let location = Self::location(path)?;

        let sha256 = format!("{:x}", Sha256::digest(&data));
        let size = data.len();

        let mut options = PutOptions::default();
        if self.content_types {
            let mut attributes = Attributes::new();
            attributes.insert(
                Attribute::ContentType,
                AttributeValue::from(content_type.to_string()),
            );
            options.attributes = attributes;
        }

        store
            .put_opts(&location, PutPayload::from(data), options)
            .await
            .map_err(|e| {
                ScanAheadError::Upload(format!("{}/{}: {}", self.bucket_name(bucket), path, e))
            })?;

        debug!(
            "Stored {} bytes at {}/{} (sha256 {})",
            size,
            self.bucket_name(bucket),
            path,
            sha256
        );

        Ok(StoredObject {
            bucket,
            path: path.to_string(),
            size,
            sha256,
        })
    }

    /// 上传第 `index` 张照片（从0开始）
    pub async fn upload_image(&self, appointment_id: &Uuid, index: usize, data: Bytes) -> Result<String> {
        let path = utils::image_path(appointment_id, index);
        self.store_file(Bucket::Images, &path, data, "image/jpeg").await?;
        Ok(path)
    }

    /// 上传语音备注
    pub async fn upload_audio(&self, appointment_id: &Uuid, data: Bytes) -> Result<String> {
        let path = utils::audio_path(appointment_id);
        self.store_file(Bucket::Audio, &path, data, "audio/webm").await?;
        Ok(path)
    }

    /// 上传病例视频，扩展名与 Content-Type 由声明的 MIME 类型决定
    pub async fn upload_video(&self, appointment_id: &Uuid, data: Bytes, mime_type: &str) -> Result<String> {
        let extension = utils::resolve_video_extension(mime_type);
        let path = utils::video_path(appointment_id, extension);
        let content_type = utils::video_content_type(mime_type);
        self.store_file(Bucket::Video, &path, data, &content_type).await?;
        Ok(path)
    }

    /// 上传解压得到的 GLB 模型
    pub async fn upload_model(&self, appointment_id: &Uuid, data: Bytes) -> Result<String> {
        let path = utils::model_path(appointment_id);
        self.store_file(Bucket::Models, &path, data, GLB_CONTENT_TYPE).await?;
        Ok(path)
    }

    /// 获取文件
    pub async fn get_file(&self, bucket: Bucket, path: &str) -> Result<Bytes> {
        let store = self.store(bucket)?;
        let location = Self::location(path)?;
        let result = store.get(&location).await.map_err(|e| map_read_error(path, e))?;
        result.bytes().await.map_err(|e| map_read_error(path, e))
    }

    /// 读取对象的 Content-Type
    pub async fn content_type(&self, bucket: Bucket, path: &str) -> Result<Option<String>> {
        let store = self.store(bucket)?;
        let location = Self::location(path)?;
        let result = store.get(&location).await.map_err(|e| map_read_error(path, e))?;
        Ok(result
            .attributes
            .get(&Attribute::ContentType)
            .map(|value| value.to_string()))
    }

    pub async fn exists(&self, bucket: Bucket, path: &str) -> Result<bool> {
        let store = self.store(bucket)?;
        let location = Self::location(path)?;
        match store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(ScanAheadError::Storage(e.to_string())),
        }
    }

    /// 列出前缀下的所有对象路径
    pub async fn list_paths(&self, bucket: Bucket, prefix: &str) -> Result<Vec<String>> {
        let store = self.store(bucket)?;
        let prefix = Self::location(prefix)?;
        let objects: Vec<_> = store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(|e| ScanAheadError::Storage(e.to_string()))?;
        Ok(objects.into_iter().map(|meta| meta.location.to_string()).collect())
    }

    /// 查找预约已有的三维模型
    ///
    /// 先直接检查规范路径，再列出预约目录寻找规范文件名。
    pub async fn find_model(&self, appointment_id: &Uuid) -> Result<Option<String>> {
        let canonical = utils::model_path(appointment_id);
        if self.exists(Bucket::Models, &canonical).await? {
            return Ok(Some(canonical));
        }

        let store = self.store(Bucket::Models)?;
        let prefix = Self::location(&appointment_id.to_string())?;
        let objects: Vec<_> = store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(|e| ScanAheadError::Storage(e.to_string()))?;

        Ok(objects
            .into_iter()
            .find(|meta| meta.location.filename() == Some(MODEL_FILE))
            .map(|meta| meta.location.to_string()))
    }
}

fn map_read_error(path: &str, err: object_store::Error) -> ScanAheadError {
    match err {
        object_store::Error::NotFound { .. } => ScanAheadError::NotFound(path.to_string()),
        other => ScanAheadError::Storage(other.to_string()),
    }
}

fn backend_name(backend: &StorageBackend) -> &'static str {
    match backend {
        StorageBackend::Memory => "memory",
        StorageBackend::Local { .. } => "local",
        StorageBackend::S3 { .. } => "s3",
    }
}
