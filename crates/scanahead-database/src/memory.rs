//! 进程内病例记录，用于开发环境和测试

use crate::models::{NewAppointment, NewCaseSubmission};
use crate::records::{AttachOutcome, CaseIds, CaseRecords};
use async_trait::async_trait;
use chrono::Utc;
use scanahead_core::{
    Appointment, AppointmentStatus, CaseDetail, CaseSubmission, ReconstructionStatus, Result,
    ScanAheadError,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    appointments: HashMap<Uuid, Appointment>,
    submissions: HashMap<Uuid, CaseSubmission>,
}

impl Tables {
    fn submission_for(&self, appointment_id: &Uuid) -> Option<&CaseSubmission> {
        self.submissions
            .values()
            .find(|submission| submission.appointment_id == *appointment_id)
    }

    fn insert_submission(&mut self, submission: NewCaseSubmission) -> Result<Uuid> {
        if !self.appointments.contains_key(&submission.appointment_id) {
            return Err(ScanAheadError::NotFound(format!(
                "预约不存在: {}",
                submission.appointment_id
            )));
        }
        if self.submissions.contains_key(&submission.id)
            || self.submission_for(&submission.appointment_id).is_some()
        {
            return Err(ScanAheadError::Database(format!(
                "预约已有病例提交: {}",
                submission.appointment_id
            )));
        }
        let id = submission.id;
        self.submissions
            .insert(id, submission.into_submission(Utc::now()));
        Ok(id)
    }
}

/// 进程内实现，一把锁保护两张表，写入天然原子
#[derive(Default)]
pub struct MemoryCaseRecords {
    tables: RwLock<Tables>,
}

impl MemoryCaseRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn appointment_count(&self) -> usize {
        self.tables.read().await.appointments.len()
    }

    pub async fn submission_count(&self) -> usize {
        self.tables.read().await.submissions.len()
    }
}

#[async_trait]
impl CaseRecords for MemoryCaseRecords {
    async fn create_case(
        &self,
        appointment: NewAppointment,
        submission: NewCaseSubmission,
    ) -> Result<CaseIds> {
        let mut tables = self.tables.write().await;
        if tables.appointments.contains_key(&appointment.id) {
            return Err(ScanAheadError::Database(format!(
                "预约已存在: {}",
                appointment.id
            )));
        }
        if submission.appointment_id != appointment.id {
            return Err(ScanAheadError::Validation(
                "病例提交必须引用同一预约".to_string(),
            ));
        }

        let ids = CaseIds {
            appointment_id: appointment.id,
            submission_id: submission.id,
        };
        tables
            .appointments
            .insert(appointment.id, appointment.into_appointment(Utc::now()));
        if let Err(e) = tables.insert_submission(submission) {
            tables.appointments.remove(&ids.appointment_id);
            return Err(e);
        }
        Ok(ids)
    }

    async fn create_submission(&self, submission: NewCaseSubmission) -> Result<Uuid> {
        self.tables.write().await.insert_submission(submission)
    }

    async fn attach_model(
        &self,
        submission_id: &Uuid,
        model_path: &str,
        status: ReconstructionStatus,
    ) -> Result<AttachOutcome> {
        let mut tables = self.tables.write().await;
        let submission = tables
            .submissions
            .get_mut(submission_id)
            .ok_or_else(|| ScanAheadError::NotFound(format!("病例提交不存在: {}", submission_id)))?;

        match &submission.model_path {
            Some(existing) => Ok(AttachOutcome::AlreadyAttached(existing.clone())),
            None => {
                submission.model_path = Some(model_path.to_string());
                submission.model_status = Some(status);
                Ok(AttachOutcome::Attached)
            }
        }
    }

    async fn get_submission(&self, submission_id: &Uuid) -> Result<Option<CaseSubmission>> {
        Ok(self.tables.read().await.submissions.get(submission_id).cloned())
    }

    async fn get_case(&self, appointment_id: &Uuid) -> Result<Option<CaseDetail>> {
        let tables = self.tables.read().await;
        Ok(tables.appointments.get(appointment_id).map(|appointment| CaseDetail {
            appointment: appointment.clone(),
            submission: tables.submission_for(appointment_id).cloned(),
        }))
    }

    async fn update_appointment_status(
        &self,
        appointment_id: &Uuid,
        status: AppointmentStatus,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let appointment = tables
            .appointments
            .get_mut(appointment_id)
            .ok_or_else(|| ScanAheadError::NotFound(format!("预约不存在: {}", appointment_id)))?;
        appointment.status = status;
        Ok(())
    }

    async fn save_doctor_notes(&self, submission_id: &Uuid, notes: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let submission = tables
            .submissions
            .get_mut(submission_id)
            .ok_or_else(|| ScanAheadError::NotFound(format!("病例提交不存在: {}", submission_id)))?;
        submission.doctor_notes = Some(notes.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use scanahead_core::{JobHandle, TranscriptionState};

    fn new_case() -> (NewAppointment, NewCaseSubmission) {
        let appointment_id = Uuid::new_v4();
        let appointment = NewAppointment {
            id: appointment_id,
            patient_id: Uuid::new_v4(),
            patient_name: "Ada Lovelace".to_string(),
            patient_email: "ada@example.com".to_string(),
            body_part: "Left knee".to_string(),
            chief_complaint: "Swelling".to_string(),
            preferred_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            preferred_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        };
        let submission = NewCaseSubmission {
            id: Uuid::new_v4(),
            appointment_id,
            image_paths: vec![],
            audio_path: format!("{}/voice-note.webm", appointment_id),
            video_path: Some(format!("{}/case-video.webm", appointment_id)),
            transcription: None,
            transcription_state: TranscriptionState::Unconfigured,
            ai_summary: None,
            reconstruction_job: Some(JobHandle::new("serial-1")),
            model_status: Some(ReconstructionStatus::Queued),
        };
        (appointment, submission)
    }

    #[tokio::test]
    async fn test_create_case_and_join() {
        let records = MemoryCaseRecords::new();
        let (appointment, submission) = new_case();
        let ids = records.create_case(appointment, submission).await.unwrap();

        let case = records.get_case(&ids.appointment_id).await.unwrap().unwrap();
        assert_eq!(case.appointment.status, AppointmentStatus::Submitted);
        let submission = case.submission.unwrap();
        assert_eq!(submission.id, ids.submission_id);
        assert_eq!(submission.model_status, Some(ReconstructionStatus::Queued));
        assert_eq!(records.appointment_count().await, 1);
        assert_eq!(records.submission_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_case_rejects_mismatched_appointment() {
        let records = MemoryCaseRecords::new();
        let (appointment, mut submission) = new_case();
        submission.appointment_id = Uuid::new_v4();

        assert!(records.create_case(appointment, submission).await.is_err());
        assert_eq!(records.appointment_count().await, 0);
        assert_eq!(records.submission_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_submission_requires_appointment() {
        let records = MemoryCaseRecords::new();
        let (_, submission) = new_case();
        let err = records.create_submission(submission).await.unwrap_err();
        assert!(matches!(err, ScanAheadError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_attach_model_is_conditional() {
        let records = MemoryCaseRecords::new();
        let (appointment, submission) = new_case();
        let ids = records.create_case(appointment, submission).await.unwrap();

        let first = records
            .attach_model(&ids.submission_id, "a/model.glb", ReconstructionStatus::Succeeded)
            .await
            .unwrap();
        assert_eq!(first, AttachOutcome::Attached);

        let second = records
            .attach_model(&ids.submission_id, "b/model.glb", ReconstructionStatus::Succeeded)
            .await
            .unwrap();
        assert_eq!(second, AttachOutcome::AlreadyAttached("a/model.glb".to_string()));

        let stored = records.get_submission(&ids.submission_id).await.unwrap().unwrap();
        assert_eq!(stored.model_path.as_deref(), Some("a/model.glb"));
        assert_eq!(stored.model_status, Some(ReconstructionStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_reviewer_updates() {
        let records = MemoryCaseRecords::new();
        let (appointment, submission) = new_case();
        let ids = records.create_case(appointment, submission).await.unwrap();

        records
            .update_appointment_status(&ids.appointment_id, AppointmentStatus::Reviewing)
            .await
            .unwrap();
        records
            .save_doctor_notes(&ids.submission_id, "Order MRI")
            .await
            .unwrap();

        let case = records.get_case(&ids.appointment_id).await.unwrap().unwrap();
        assert_eq!(case.appointment.status, AppointmentStatus::Reviewing);
        assert_eq!(case.submission.unwrap().doctor_notes.as_deref(), Some("Order MRI"));

        let missing = records
            .update_appointment_status(&Uuid::new_v4(), AppointmentStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(missing, ScanAheadError::NotFound(_)));
    }
}
