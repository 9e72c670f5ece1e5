//! 三维模型状态机
//!
//! 管理单个病例从启动重建任务到模型入库的状态转换

use scanahead_core::{CaseSubmission, ReconstructionStatus, Result, ScanAheadError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 病例的三维模型状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CaseModelState {
    NoJob,
    Queued,
    Processing,
    Uploading,
    Failed,
    Expired,
    Succeeded,
    Stored, // 模型已解压并保存
}

impl CaseModelState {
    /// 由已存储的病例记录推断当前状态
    pub fn from_submission(submission: &CaseSubmission) -> Self {
        if submission.model_path.is_some() {
            return CaseModelState::Stored;
        }
        if submission.reconstruction_job.is_none() {
            return CaseModelState::NoJob;
        }
        match submission.model_status {
            Some(status) => Self::from_status(status).unwrap_or(CaseModelState::Queued),
            None => CaseModelState::Queued,
        }
    }

    fn from_status(status: ReconstructionStatus) -> Option<Self> {
        match status {
            ReconstructionStatus::Queued => Some(CaseModelState::Queued),
            ReconstructionStatus::Processing => Some(CaseModelState::Processing),
            ReconstructionStatus::Uploading => Some(CaseModelState::Uploading),
            ReconstructionStatus::Failed => Some(CaseModelState::Failed),
            ReconstructionStatus::Expired => Some(CaseModelState::Expired),
            ReconstructionStatus::Succeeded => Some(CaseModelState::Succeeded),
            ReconstructionStatus::Unknown => None,
        }
    }

    /// 对应的重建状态，没有任务时为 `None`
    pub fn status(&self) -> Option<ReconstructionStatus> {
        match self {
            CaseModelState::NoJob => None,
            CaseModelState::Queued => Some(ReconstructionStatus::Queued),
            CaseModelState::Processing => Some(ReconstructionStatus::Processing),
            CaseModelState::Uploading => Some(ReconstructionStatus::Uploading),
            CaseModelState::Failed => Some(ReconstructionStatus::Failed),
            CaseModelState::Expired => Some(ReconstructionStatus::Expired),
            CaseModelState::Succeeded | CaseModelState::Stored => {
                Some(ReconstructionStatus::Succeeded)
            }
        }
    }

    /// 界面展示用标签
    pub fn label(&self) -> &'static str {
        match self {
            CaseModelState::Stored => "Stored",
            other => other
                .status()
                .map(|status| status.label())
                .unwrap_or(ReconstructionStatus::Unknown.label()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaseModelState::Failed
                | CaseModelState::Expired
                | CaseModelState::Succeeded
                | CaseModelState::Stored
        )
    }
}

/// 状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ModelEvent {
    JobStarted,
    Observed(ReconstructionStatus),
    ModelStored,
}

/// 模型状态机
#[derive(Debug)]
pub struct ModelStateMachine {
    transitions: HashMap<(CaseModelState, ModelEvent), CaseModelState>,
}

impl ModelStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((CaseModelState::NoJob, ModelEvent::JobStarted), CaseModelState::Queued);

        // 未结束的任务可以观察到任何已知状态
        let in_flight = [
            CaseModelState::Queued,
            CaseModelState::Processing,
            CaseModelState::Uploading,
        ];
        let observable = [
            (ReconstructionStatus::Queued, CaseModelState::Queued),
            (ReconstructionStatus::Processing, CaseModelState::Processing),
            (ReconstructionStatus::Uploading, CaseModelState::Uploading),
            (ReconstructionStatus::Failed, CaseModelState::Failed),
            (ReconstructionStatus::Expired, CaseModelState::Expired),
            (ReconstructionStatus::Succeeded, CaseModelState::Succeeded),
        ];
        for from in in_flight {
            for (status, to) in observable {
                transitions.insert((from, ModelEvent::Observed(status)), to);
            }
        }

        transitions.insert(
            (CaseModelState::Succeeded, ModelEvent::ModelStored),
            CaseModelState::Stored,
        );

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: &CaseModelState, event: &ModelEvent) -> bool {
        self.transitions.contains_key(&(*from, *event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: &CaseModelState, event: &ModelEvent) -> Result<CaseModelState> {
        match self.transitions.get(&(*from, *event)) {
            Some(to) => Ok(*to),
            None => Err(ScanAheadError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            }),
        }
    }

    /// 应用一次状态查询结果
    ///
    /// 无法识别的结果和终态之后的结果都不改变状态。
    pub fn observe(&self, from: CaseModelState, status: ReconstructionStatus) -> CaseModelState {
        if status == ReconstructionStatus::Unknown || from.is_terminal() {
            return from;
        }
        self.transition(&from, &ModelEvent::Observed(status))
            .unwrap_or(from)
    }

    /// 获取状态的所有可能事件
    pub fn get_possible_events(&self, current_state: &CaseModelState) -> Vec<ModelEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| state == current_state)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for ModelStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
