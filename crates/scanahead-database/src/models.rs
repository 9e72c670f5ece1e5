//! 数据库模型

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use scanahead_core::models::*;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 数据库预约表
#[derive(Debug, FromRow)]
pub struct DbAppointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_email: String,
    pub body_part: String,
    pub chief_complaint: String,
    pub preferred_date: NaiveDate,
    pub preferred_time: NaiveTime,
    pub status: String, // 存储为字符串，转换为AppointmentStatus枚举
    pub created_at: DateTime<Utc>,
}

impl From<DbAppointment> for Appointment {
    fn from(db: DbAppointment) -> Self {
        Appointment {
            id: db.id,
            patient_id: db.patient_id,
            patient_name: db.patient_name,
            patient_email: db.patient_email,
            body_part: db.body_part,
            chief_complaint: db.chief_complaint,
            preferred_date: db.preferred_date,
            preferred_time: db.preferred_time,
            status: AppointmentStatus::parse(&db.status).unwrap_or(AppointmentStatus::Submitted),
            created_at: db.created_at,
        }
    }
}

/// 数据库病例提交表
#[derive(Debug, FromRow)]
pub struct DbCaseSubmission {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub image_paths: Vec<String>,
    pub audio_path: String,
    pub video_path: Option<String>,
    pub transcription: Option<String>,
    pub transcription_state: String,
    pub ai_summary: Option<Json<ClinicalSummary>>,
    pub reconstruction_job: Option<String>,
    pub model_path: Option<String>,
    pub model_status: Option<String>, // 存储为状态名，如 QUEUED
    pub doctor_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbCaseSubmission> for CaseSubmission {
    fn from(db: DbCaseSubmission) -> Self {
        let transcription_state = TranscriptionState::parse(&db.transcription_state)
            .unwrap_or(match &db.transcription {
                Some(text) if text.is_empty() => TranscriptionState::Empty,
                Some(_) => TranscriptionState::Available,
                None => TranscriptionState::Failed,
            });

        CaseSubmission {
            id: db.id,
            appointment_id: db.appointment_id,
            image_paths: db.image_paths,
            audio_path: db.audio_path,
            video_path: db.video_path,
            transcription: db.transcription,
            transcription_state,
            ai_summary: db.ai_summary.map(|Json(summary)| summary),
            reconstruction_job: db.reconstruction_job.map(JobHandle::new),
            model_path: db.model_path,
            model_status: db.model_status.as_deref().map(ReconstructionStatus::parse),
            doctor_notes: db.doctor_notes,
            created_at: db.created_at,
        }
    }
}

/// 预约与病例提交的联合查询行
///
/// 提交列来自 LEFT JOIN，均为可空。
#[derive(Debug, FromRow)]
pub struct DbCaseRow {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_email: String,
    pub body_part: String,
    pub chief_complaint: String,
    pub preferred_date: NaiveDate,
    pub preferred_time: NaiveTime,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub submission_id: Option<Uuid>,
    pub image_paths: Option<Vec<String>>,
    pub audio_path: Option<String>,
    pub video_path: Option<String>,
    pub transcription: Option<String>,
    pub transcription_state: Option<String>,
    pub ai_summary: Option<Json<ClinicalSummary>>,
    pub reconstruction_job: Option<String>,
    pub model_path: Option<String>,
    pub model_status: Option<String>,
    pub doctor_notes: Option<String>,
    pub submission_created_at: Option<DateTime<Utc>>,
}

impl From<DbCaseRow> for CaseDetail {
    fn from(row: DbCaseRow) -> Self {
        let submission = match (row.submission_id, row.audio_path, row.submission_created_at) {
            (Some(id), Some(audio_path), Some(created_at)) => Some(CaseSubmission::from(DbCaseSubmission {
                id,
                appointment_id: row.id,
                image_paths: row.image_paths.unwrap_or_default(),
                audio_path,
                video_path: row.video_path,
                transcription: row.transcription,
                transcription_state: row.transcription_state.unwrap_or_default(),
                ai_summary: row.ai_summary,
                reconstruction_job: row.reconstruction_job,
                model_path: row.model_path,
                model_status: row.model_status,
                doctor_notes: row.doctor_notes,
                created_at,
            })),
            _ => None,
        };

        let appointment = Appointment::from(DbAppointment {
            id: row.id,
            patient_id: row.patient_id,
            patient_name: row.patient_name,
            patient_email: row.patient_email,
            body_part: row.body_part,
            chief_complaint: row.chief_complaint,
            preferred_date: row.preferred_date,
            preferred_time: row.preferred_time,
            status: row.status,
            created_at: row.created_at,
        });

        CaseDetail {
            appointment,
            submission,
        }
    }
}

// 插入模型 - 用于创建新记录

/// 新预约插入模型，状态固定为 submitted
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_email: String,
    pub body_part: String,
    pub chief_complaint: String,
    pub preferred_date: NaiveDate,
    pub preferred_time: NaiveTime,
}

impl NewAppointment {
    pub fn into_appointment(self, created_at: DateTime<Utc>) -> Appointment {
        Appointment {
            id: self.id,
            patient_id: self.patient_id,
            patient_name: self.patient_name,
            patient_email: self.patient_email,
            body_part: self.body_part,
            chief_complaint: self.chief_complaint,
            preferred_date: self.preferred_date,
            preferred_time: self.preferred_time,
            status: AppointmentStatus::Submitted,
            created_at,
        }
    }
}

/// 新病例提交插入模型
#[derive(Debug, Clone)]
pub struct NewCaseSubmission {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub image_paths: Vec<String>,
    pub audio_path: String,
    pub video_path: Option<String>,
    pub transcription: Option<String>,
    pub transcription_state: TranscriptionState,
    pub ai_summary: Option<ClinicalSummary>,
    pub reconstruction_job: Option<JobHandle>,
    pub model_status: Option<ReconstructionStatus>,
}

impl NewCaseSubmission {
    pub fn into_submission(self, created_at: DateTime<Utc>) -> CaseSubmission {
        CaseSubmission {
            id: self.id,
            appointment_id: self.appointment_id,
            image_paths: self.image_paths,
            audio_path: self.audio_path,
            video_path: self.video_path,
            transcription: self.transcription,
            transcription_state: self.transcription_state,
            ai_summary: self.ai_summary,
            reconstruction_job: self.reconstruction_job,
            model_path: None,
            model_status: self.model_status,
            doctor_notes: None,
            created_at,
        }
    }
}
