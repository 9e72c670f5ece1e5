//! 本地草稿持久化
//!
//! 草稿只属于当前会话。持久化失败只记录日志，内存中的草稿始终是当前会话的权威数据。

use async_trait::async_trait;
use scanahead_core::Draft;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 草稿默认键名
pub const DRAFT_KEY: &str = "newCase";

/// 草稿存储接口
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// 读取草稿，不存在或读取失败时返回 `None`
    async fn load(&self) -> Option<Draft>;

    /// 覆盖保存草稿
    async fn save(&self, draft: &Draft);

    /// 删除草稿
    async fn clear(&self);
}

/// 基于本地文件的草稿存储
pub struct FileDraftStore {
    dir: PathBuf,
    key: String,
}

impl FileDraftStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_key(dir, DRAFT_KEY)
    }

    pub fn with_key(dir: impl Into<PathBuf>, key: &str) -> Self {
        Self {
            dir: dir.into(),
            key: key.to_string(),
        }
    }

    fn file_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.key))
    }

    async fn write(&self, draft: &Draft) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let payload = serde_json::to_vec(draft)?;
        // 先写临时文件再重命名，读取方不会看到写了一半的内容
        let tmp = self.dir.join(format!("{}.json.tmp", self.key));
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, self.file_path()).await
    }
}

#[async_trait]
impl DraftStore for FileDraftStore {
    async fn load(&self) -> Option<Draft> {
        let bytes = match tokio::fs::read(self.file_path()).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read draft {}: {}", self.key, e);
                return None;
            }
        };

        match serde_json::from_slice::<Draft>(&bytes) {
            Ok(draft) => Some(draft.normalized()),
            Err(e) => {
                warn!("Discarding unreadable draft {}: {}", self.key, e);
                None
            }
        }
    }

    async fn save(&self, draft: &Draft) {
        if let Err(e) = self.write(draft).await {
            warn!("Failed to persist draft {}: {}", self.key, e);
        }
    }

    async fn clear(&self) {
        match tokio::fs::remove_file(self.file_path()).await {
            Ok(()) => debug!("Draft {} cleared", self.key),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clear draft {}: {}", self.key, e),
        }
    }
}

/// 进程内草稿存储
#[derive(Default)]
pub struct MemoryDraftStore {
    draft: RwLock<Option<Draft>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn load(&self) -> Option<Draft> {
        self.draft.read().await.clone().map(Draft::normalized)
    }

    async fn save(&self, draft: &Draft) {
        *self.draft.write().await = Some(draft.clone());
    }

    async fn clear(&self) {
        *self.draft.write().await = None;
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    version: u64,
    draft: Option<Draft>,
}

/// 草稿会话
///
/// 修改立即在内存中生效并返回；后台单一写入任务只持久化最新的版本，
/// 多次快速修改最终收敛到最后一次写入。
pub struct DraftSession {
    state: watch::Sender<Snapshot>,
    persisted: watch::Receiver<u64>,
    writer: JoinHandle<()>,
}

impl DraftSession {
    /// 从存储中恢复草稿并启动后台写入任务
    pub async fn open(store: Arc<dyn DraftStore>) -> Self {
        let restored = store.load().await;
        if restored.is_some() {
            debug!("Restored draft from previous session");
        }

        let (state, updates) = watch::channel(Snapshot {
            version: 0,
            draft: restored,
        });
        let (ack, persisted) = watch::channel(0u64);
        let writer = tokio::spawn(run_writer(store, updates, ack));

        Self {
            state,
            persisted,
            writer,
        }
    }

    /// 当前草稿
    pub fn current(&self) -> Option<Draft> {
        self.state.borrow().draft.clone()
    }

    /// 修改草稿，不存在时先创建
    pub fn update<F>(&self, edit: F) -> Draft
    where
        F: FnOnce(&mut Draft),
    {
        self.state.send_modify(|snapshot| {
            let draft = snapshot.draft.get_or_insert_with(Draft::new);
            edit(draft);
            draft.touch();
            snapshot.version += 1;
        });
        self.current().unwrap_or_default()
    }

    /// 整体替换草稿
    pub fn replace(&self, mut draft: Draft) {
        draft.touch();
        self.state.send_modify(|snapshot| {
            snapshot.draft = Some(draft);
            snapshot.version += 1;
        });
    }

    /// 丢弃草稿（提交成功或用户主动放弃）
    pub fn discard(&self) {
        self.state.send_modify(|snapshot| {
            snapshot.draft = None;
            snapshot.version += 1;
        });
    }

    /// 等待后台写入追上当前版本
    pub async fn flush(&self) {
        let target = self.state.borrow().version;
        let mut persisted = self.persisted.clone();
        let _ = persisted.wait_for(|version| *version >= target).await;
    }

    /// 写完所有待持久化的修改后关闭会话
    pub async fn close(self) {
        let DraftSession { state, writer, .. } = self;
        drop(state);
        if let Err(e) = writer.await {
            warn!("Draft writer task ended abnormally: {}", e);
        }
    }
}

async fn run_writer(
    store: Arc<dyn DraftStore>,
    mut updates: watch::Receiver<Snapshot>,
    ack: watch::Sender<u64>,
) {
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        match &snapshot.draft {
            Some(draft) => store.save(draft).await,
            None => store.clear().await,
        }
        let _ = ack.send(snapshot.version);
    }
}
