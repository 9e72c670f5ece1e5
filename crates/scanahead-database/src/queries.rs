//! 数据库查询操作

use crate::connection::DatabasePool;
use crate::models::*;
use scanahead_core::{
    Appointment, AppointmentStatus, CaseDetail, CaseSubmission, ReconstructionStatus, Result,
    ScanAheadError,
};
use sqlx::types::Json;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

/// 数据库查询操作接口
pub struct DatabaseQueries<'a> {
    pool: &'a DatabasePool,
}

impl<'a> DatabaseQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 创建预约表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS appointments (
                id UUID PRIMARY KEY,
                patient_id UUID NOT NULL,
                patient_name VARCHAR(255) NOT NULL,
                patient_email VARCHAR(255) NOT NULL,
                body_part VARCHAR(128) NOT NULL,
                chief_complaint TEXT NOT NULL DEFAULT '',
                preferred_date DATE NOT NULL,
                preferred_time TIME NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'submitted',
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ScanAheadError::Database(e.to_string()))?;

        // 创建病例提交表，与预约一对一
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS case_submissions (
                id UUID PRIMARY KEY,
                appointment_id UUID UNIQUE NOT NULL REFERENCES appointments(id),
                image_paths TEXT[] NOT NULL DEFAULT '{}',
                audio_path VARCHAR(512) NOT NULL,
                video_path VARCHAR(512),
                transcription TEXT,
                transcription_state VARCHAR(20) NOT NULL,
                ai_summary JSONB,
                reconstruction_job VARCHAR(128),
                model_path VARCHAR(512),
                model_status VARCHAR(20),
                doctor_notes TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ScanAheadError::Database(e.to_string()))?;

        // 创建索引以优化查询性能
        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_appointments_patient_id ON appointments(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_appointments_status ON appointments(status)",
            "CREATE INDEX IF NOT EXISTS idx_case_submissions_reconstruction_job ON case_submissions(reconstruction_job)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(|e| ScanAheadError::Database(e.to_string()))?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }

    // ========== 写入操作 ==========

    /// 在同一事务中写入预约和病例提交
    pub async fn create_case(
        &self,
        appointment: &NewAppointment,
        submission: &NewCaseSubmission,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| ScanAheadError::Database(e.to_string()))?;

        insert_appointment(&mut tx, appointment).await?;
        insert_submission(&mut tx, submission).await?;

        tx.commit()
            .await
            .map_err(|e| ScanAheadError::Database(e.to_string()))?;
        Ok(())
    }

    /// 为已存在的预约写入病例提交
    pub async fn create_submission(&self, submission: &NewCaseSubmission) -> Result<Uuid> {
        let mut conn = self
            .pool
            .pool()
            .acquire()
            .await
            .map_err(|e| ScanAheadError::Database(e.to_string()))?;
        insert_submission(&mut conn, submission).await?;
        Ok(submission.id)
    }

    /// 仅在尚未记录模型路径时写入路径和状态
    ///
    /// 返回 `None` 表示提交记录已有模型，未做修改。
    pub async fn attach_model(
        &self,
        submission_id: &Uuid,
        model_path: &str,
        status: ReconstructionStatus,
    ) -> Result<Option<Uuid>> {
        sqlx::query(r#"
            UPDATE case_submissions
            SET model_path = $2, model_status = $3
            WHERE id = $1 AND model_path IS NULL
            RETURNING id
        "#)
        .bind(submission_id)
        .bind(model_path)
        .bind(status.as_str())
        .fetch_optional(self.pool.pool())
        .await
        .map(|row| row.map(|row| row.get("id")))
        .map_err(|e| ScanAheadError::Database(e.to_string()))
    }

    /// 更新预约状态，返回受影响行数
    pub async fn update_appointment_status(
        &self,
        appointment_id: &Uuid,
        status: AppointmentStatus,
    ) -> Result<u64> {
        sqlx::query("UPDATE appointments SET status = $2 WHERE id = $1")
            .bind(appointment_id)
            .bind(status.as_str())
            .execute(self.pool.pool())
            .await
            .map(|result| result.rows_affected())
            .map_err(|e| ScanAheadError::Database(e.to_string()))
    }

    /// 保存医生备注，返回受影响行数
    pub async fn save_doctor_notes(&self, submission_id: &Uuid, notes: &str) -> Result<u64> {
        sqlx::query("UPDATE case_submissions SET doctor_notes = $2 WHERE id = $1")
            .bind(submission_id)
            .bind(notes)
            .execute(self.pool.pool())
            .await
            .map(|result| result.rows_affected())
            .map_err(|e| ScanAheadError::Database(e.to_string()))
    }

    // ========== 查询操作 ==========

    pub async fn get_appointment(&self, id: &Uuid) -> Result<Option<Appointment>> {
        let result = sqlx::query_as::<_, DbAppointment>("SELECT * FROM appointments WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| ScanAheadError::Database(e.to_string()))?;

        Ok(result.map(Appointment::from))
    }

    pub async fn get_submission(&self, id: &Uuid) -> Result<Option<CaseSubmission>> {
        let result =
            sqlx::query_as::<_, DbCaseSubmission>("SELECT * FROM case_submissions WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(|e| ScanAheadError::Database(e.to_string()))?;

        Ok(result.map(CaseSubmission::from))
    }

    /// 预约与其病例提交的联合查询
    pub async fn get_case(&self, appointment_id: &Uuid) -> Result<Option<CaseDetail>> {
        let result = sqlx::query_as::<_, DbCaseRow>(r#"
            SELECT a.id, a.patient_id, a.patient_name, a.patient_email, a.body_part,
                   a.chief_complaint, a.preferred_date, a.preferred_time, a.status, a.created_at,
                   s.id AS submission_id, s.image_paths, s.audio_path, s.video_path,
                   s.transcription, s.transcription_state, s.ai_summary, s.reconstruction_job,
                   s.model_path, s.model_status, s.doctor_notes,
                   s.created_at AS submission_created_at
            FROM appointments a
            LEFT JOIN case_submissions s ON s.appointment_id = a.id
            WHERE a.id = $1
        "#)
        .bind(appointment_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| ScanAheadError::Database(e.to_string()))?;

        Ok(result.map(CaseDetail::from))
    }
}

async fn insert_appointment(conn: &mut PgConnection, appointment: &NewAppointment) -> Result<()> {
    sqlx::query(r#"
        INSERT INTO appointments (id, patient_id, patient_name, patient_email, body_part,
                                  chief_complaint, preferred_date, preferred_time, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    "#)
    .bind(appointment.id)
    .bind(appointment.patient_id)
    .bind(&appointment.patient_name)
    .bind(&appointment.patient_email)
    .bind(&appointment.body_part)
    .bind(&appointment.chief_complaint)
    .bind(appointment.preferred_date)
    .bind(appointment.preferred_time)
    .bind(AppointmentStatus::Submitted.as_str())
    .execute(conn)
    .await
    .map_err(|e| ScanAheadError::Database(e.to_string()))?;
    Ok(())
}

async fn insert_submission(conn: &mut PgConnection, submission: &NewCaseSubmission) -> Result<()> {
    sqlx::query(r#"
        INSERT INTO case_submissions (id, appointment_id, image_paths, audio_path, video_path,
                                      transcription, transcription_state, ai_summary,
                                      reconstruction_job, model_status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    "#)
    .bind(submission.id)
    .bind(submission.appointment_id)
    .bind(&submission.image_paths)
    .bind(&submission.audio_path)
    .bind(&submission.video_path)
    .bind(&submission.transcription)
    .bind(submission.transcription_state.as_str())
    .bind(submission.ai_summary.as_ref().map(Json))
    .bind(submission.reconstruction_job.as_ref().map(|job| job.as_str()))
    .bind(submission.model_status.map(|status| status.as_str()))
    .execute(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => ScanAheadError::NotFound(
            format!("预约不存在: {}", submission.appointment_id),
        ),
        other => ScanAheadError::Database(other.to_string()),
    })?;
    Ok(())
}
