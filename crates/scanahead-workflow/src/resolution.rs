//! 三维模型解析
//!
//! 状态只在用户触发时查询，不做后台轮询。查询结果只更新本地缓存，
//! 数据库中的模型路径和状态只通过条件写入 `attach_model` 一起修改。

use crate::state_machine::{CaseModelState, ModelEvent, ModelStateMachine};
use scanahead_core::{CaseSubmission, ReconstructionStatus, Result, ScanAheadError};
use scanahead_database::CaseRecords;
use scanahead_integration::{ArchiveFetcher, ReconstructionService};
use scanahead_storage::{extract_model, StorageManager};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 模型解析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedModel {
    pub submission_id: Uuid,
    pub model_path: String,
    /// 模型已存在，未重新下载
    pub short_circuited: bool,
}

/// 模型解析器
pub struct ModelResolver {
    records: Arc<dyn CaseRecords>,
    storage: Arc<StorageManager>,
    reconstruction: Option<Arc<dyn ReconstructionService>>,
    fetcher: Arc<dyn ArchiveFetcher>,
    state_machine: ModelStateMachine,
    states: RwLock<HashMap<Uuid, CaseModelState>>,
}

impl ModelResolver {
    pub fn new(
        records: Arc<dyn CaseRecords>,
        storage: Arc<StorageManager>,
        reconstruction: Option<Arc<dyn ReconstructionService>>,
        fetcher: Arc<dyn ArchiveFetcher>,
    ) -> Self {
        Self {
            records,
            storage,
            reconstruction,
            fetcher,
            state_machine: ModelStateMachine::new(),
            states: RwLock::new(HashMap::new()),
        }
    }

    async fn load(&self, submission_id: &Uuid) -> Result<CaseSubmission> {
        self.records
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| ScanAheadError::NotFound(format!("病例提交不存在: {}", submission_id)))
    }

    /// 当前已知状态，不发起查询
    pub async fn current_state(&self, submission: &CaseSubmission) -> CaseModelState {
        let recorded = CaseModelState::from_submission(submission);
        if recorded == CaseModelState::Stored {
            return recorded;
        }
        self.states
            .read()
            .await
            .get(&submission.id)
            .copied()
            .unwrap_or(recorded)
    }

    async fn remember(&self, submission_id: Uuid, state: CaseModelState) {
        self.states.write().await.insert(submission_id, state);
    }

    /// 模型入库后以记录为准，清除缓存
    async fn forget(&self, submission_id: &Uuid) {
        self.states.write().await.remove(submission_id);
    }

    #[cfg(test)]
    pub(crate) async fn cached_states(&self) -> usize {
        self.states.read().await.len()
    }

    /// 查询一次重建状态
    ///
    /// 终态与已入库的模型不再查询。
    pub async fn check_status(&self, submission_id: &Uuid) -> Result<CaseModelState> {
        let submission = self.load(submission_id).await?;
        self.refresh(&submission).await
    }

    async fn refresh(&self, submission: &CaseSubmission) -> Result<CaseModelState> {
        let current = self.current_state(submission).await;
        let job = match &submission.reconstruction_job {
            Some(job) if !current.is_terminal() => job,
            _ => return Ok(current),
        };
        let service = self
            .reconstruction
            .as_ref()
            .ok_or_else(|| ScanAheadError::StatusPoll("三维重建服务未配置".to_string()))?;

        let observed = service.poll_status(job).await?;
        let next = self.state_machine.observe(current, observed);
        if observed == ReconstructionStatus::Unknown {
            debug!("Job {} returned an unrecognised status", job);
        }
        if next != current {
            info!(
                "Submission {} model state {:?} -> {:?}",
                submission.id, current, next
            );
        }
        self.remember(submission.id, next).await;
        Ok(next)
    }

    /// 获取并保存三维模型
    ///
    /// 已有模型时直接返回（必要时补写记录），不访问下载服务。
    pub async fn resolve_model(&self, submission_id: &Uuid) -> Result<ResolvedModel> {
        let submission = self.load(submission_id).await?;

        if let Some(path) = &submission.model_path {
            self.forget(&submission.id).await;
            return Ok(ResolvedModel {
                submission_id: submission.id,
                model_path: path.clone(),
                short_circuited: true,
            });
        }

        if let Some(path) = self.storage.find_model(&submission.appointment_id).await? {
            let outcome = self
                .records
                .attach_model(&submission.id, &path, ReconstructionStatus::Succeeded)
                .await?;
            let model_path = outcome.into_path(&path);
            info!(
                "Model already stored for submission {}, record back-filled with {}",
                submission.id, model_path
            );
            self.forget(&submission.id).await;
            return Ok(ResolvedModel {
                submission_id: submission.id,
                model_path,
                short_circuited: true,
            });
        }

        let job = submission
            .reconstruction_job
            .clone()
            .ok_or_else(|| ScanAheadError::ModelNotReady("该病例没有三维重建任务".to_string()))?;
        let service = self
            .reconstruction
            .as_ref()
            .ok_or_else(|| ScanAheadError::StatusPoll("三维重建服务未配置".to_string()))?;

        let mut state = self.current_state(&submission).await;
        if state != CaseModelState::Succeeded {
            state = self.refresh(&submission).await?;
        }
        if state != CaseModelState::Succeeded {
            return Err(ScanAheadError::ModelNotReady(format!(
                "重建状态: {}",
                state.label()
            )));
        }

        let location = service.fetch_result_location(&job).await?;
        let archive = self.fetcher.fetch_archive(&location).await?;
        let model = extract_model(&archive).map_err(|e| {
            warn!("No usable model in archive for job {}: {}", job, e);
            e
        })?;
        debug!("Using {} from archive of job {}", model.entry_name, job);

        let path = self
            .storage
            .upload_model(&submission.appointment_id, model.bytes)
            .await?;
        let outcome = self
            .records
            .attach_model(&submission.id, &path, ReconstructionStatus::Succeeded)
            .await?;
        let model_path = outcome.into_path(&path);

        let stored = self.state_machine.transition(&state, &ModelEvent::ModelStored)?;
        debug!("Submission {} model state {:?} -> {:?}", submission.id, state, stored);
        self.forget(&submission.id).await;
        info!("Model for submission {} stored at {}", submission.id, model_path);

        Ok(ResolvedModel {
            submission_id: submission.id,
            model_path,
            short_circuited: false,
        })
    }
}
