//! 病例记录读写接口

use crate::connection::DatabasePool;
use crate::models::{NewAppointment, NewCaseSubmission};
use crate::queries::DatabaseQueries;
use async_trait::async_trait;
use scanahead_core::{
    AppointmentStatus, CaseDetail, CaseSubmission, ReconstructionStatus, Result, ScanAheadError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// 新建病例返回的两个主键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseIds {
    pub appointment_id: Uuid,
    pub submission_id: Uuid,
}

/// 写入模型路径的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// 本次写入生效
    Attached,
    /// 记录已有模型路径，保留原值
    AlreadyAttached(String),
}

impl AttachOutcome {
    /// 最终记录中的模型路径
    pub fn into_path(self, attempted: &str) -> String {
        match self {
            AttachOutcome::Attached => attempted.to_string(),
            AttachOutcome::AlreadyAttached(existing) => existing,
        }
    }
}

/// 病例记录存储
///
/// 预约与病例提交一一对应，只在一次提交全部上传成功后一起写入。
#[async_trait]
pub trait CaseRecords: Send + Sync {
    /// 原子写入预约和病例提交
    async fn create_case(
        &self,
        appointment: NewAppointment,
        submission: NewCaseSubmission,
    ) -> Result<CaseIds>;

    /// 为已存在的预约写入病例提交
    async fn create_submission(&self, submission: NewCaseSubmission) -> Result<Uuid>;

    /// 条件写入模型路径与状态，只在记录尚无模型路径时生效
    async fn attach_model(
        &self,
        submission_id: &Uuid,
        model_path: &str,
        status: ReconstructionStatus,
    ) -> Result<AttachOutcome>;

    async fn get_submission(&self, submission_id: &Uuid) -> Result<Option<CaseSubmission>>;

    async fn get_case(&self, appointment_id: &Uuid) -> Result<Option<CaseDetail>>;

    /// 审核人员修改预约状态
    async fn update_appointment_status(
        &self,
        appointment_id: &Uuid,
        status: AppointmentStatus,
    ) -> Result<()>;

    async fn save_doctor_notes(&self, submission_id: &Uuid, notes: &str) -> Result<()>;
}

/// PostgreSQL 实现
#[derive(Clone)]
pub struct PgCaseRecords {
    pool: DatabasePool,
}

impl PgCaseRecords {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn queries(&self) -> DatabaseQueries<'_> {
        DatabaseQueries::new(&self.pool)
    }

    /// 建表和索引
    pub async fn migrate(&self) -> Result<()> {
        self.queries().create_tables().await
    }
}

#[async_trait]
impl CaseRecords for PgCaseRecords {
    async fn create_case(
        &self,
        appointment: NewAppointment,
        submission: NewCaseSubmission,
    ) -> Result<CaseIds> {
        self.queries().create_case(&appointment, &submission).await?;
        info!(
            "Case recorded: appointment {} submission {}",
            appointment.id, submission.id
        );
        Ok(CaseIds {
            appointment_id: appointment.id,
            submission_id: submission.id,
        })
    }

    async fn create_submission(&self, submission: NewCaseSubmission) -> Result<Uuid> {
        self.queries().create_submission(&submission).await
    }

    async fn attach_model(
        &self,
        submission_id: &Uuid,
        model_path: &str,
        status: ReconstructionStatus,
    ) -> Result<AttachOutcome> {
        let queries = self.queries();
        if queries
            .attach_model(submission_id, model_path, status)
            .await?
            .is_some()
        {
            return Ok(AttachOutcome::Attached);
        }

        let existing = queries
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| ScanAheadError::NotFound(format!("病例提交不存在: {}", submission_id)))?;
        match existing.model_path {
            Some(path) => {
                debug!("Submission {} already has model {}", submission_id, path);
                Ok(AttachOutcome::AlreadyAttached(path))
            }
            None => Err(ScanAheadError::Database(format!(
                "模型路径写入失败: {}",
                submission_id
            ))),
        }
    }

    async fn get_submission(&self, submission_id: &Uuid) -> Result<Option<CaseSubmission>> {
        self.queries().get_submission(submission_id).await
    }

    async fn get_case(&self, appointment_id: &Uuid) -> Result<Option<CaseDetail>> {
        self.queries().get_case(appointment_id).await
    }

    async fn update_appointment_status(
        &self,
        appointment_id: &Uuid,
        status: AppointmentStatus,
    ) -> Result<()> {
        let updated = self
            .queries()
            .update_appointment_status(appointment_id, status)
            .await?;
        if updated == 0 {
            return Err(ScanAheadError::NotFound(format!("预约不存在: {}", appointment_id)));
        }
        info!("Appointment {} status set to {}", appointment_id, status.as_str());
        Ok(())
    }

    async fn save_doctor_notes(&self, submission_id: &Uuid, notes: &str) -> Result<()> {
        let updated = self.queries().save_doctor_notes(submission_id, notes).await?;
        if updated == 0 {
            return Err(ScanAheadError::NotFound(format!("病例提交不存在: {}", submission_id)));
        }
        Ok(())
    }
}
