//! 病例提交管线
//!
//! 校验 → 上传全部媒体 → 并行执行增强与重建任务启动 → 一次性写入记录。
//! 任一上传失败即终止本次提交，此时不会写入任何记录。

use crate::enrichment::EnrichmentPipeline;
use crate::state_machine::{CaseModelState, ModelEvent, ModelStateMachine};
use crate::validation::{DraftValidator, ValidatedCase};
use bytes::Bytes;
use futures::future::try_join_all;
use scanahead_core::{
    CaptureMode, Draft, JobHandle, Result, ScanAheadError, TranscriptionState,
};
use scanahead_database::{CaseRecords, NewAppointment, NewCaseSubmission};
use scanahead_integration::{ReconstructionOptions, ReconstructionService};
use scanahead_storage::{DraftSession, StorageManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 提交结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub appointment_id: Uuid,
    pub submission_id: Uuid,
    pub image_paths: Vec<String>,
    pub audio_path: String,
    pub video_path: Option<String>,
    pub transcription_state: TranscriptionState,
    pub summary_available: bool,
    pub reconstruction_job: Option<JobHandle>,
    pub model_state: CaseModelState,
}

struct UploadedMedia {
    image_paths: Vec<String>,
    audio_path: String,
    video_path: Option<String>,
}

/// 提交管线
pub struct SubmissionPipeline {
    validator: DraftValidator,
    storage: Arc<StorageManager>,
    records: Arc<dyn CaseRecords>,
    enrichment: EnrichmentPipeline,
    reconstruction: Option<Arc<dyn ReconstructionService>>,
    options: ReconstructionOptions,
    state_machine: ModelStateMachine,
}

impl SubmissionPipeline {
    pub fn new(
        validator: DraftValidator,
        storage: Arc<StorageManager>,
        records: Arc<dyn CaseRecords>,
        enrichment: EnrichmentPipeline,
        reconstruction: Option<Arc<dyn ReconstructionService>>,
        options: ReconstructionOptions,
    ) -> Self {
        Self {
            validator,
            storage,
            records,
            enrichment,
            reconstruction,
            options,
            state_machine: ModelStateMachine::new(),
        }
    }

    /// 提交一份草稿
    pub async fn submit(&self, patient_id: Uuid, draft: &Draft) -> Result<SubmissionReceipt> {
        let case = self.validator.validate(draft)?;
        let reconstruction = match case.capture_mode {
            CaptureMode::Video => Some(self.reconstruction.as_ref().ok_or_else(|| {
                ScanAheadError::JobStart("三维重建服务未配置".to_string())
            })?),
            CaptureMode::Photos => None,
        };

        let appointment_id = Uuid::new_v4();
        info!(
            "Submitting case {} for patient {} ({:?} mode)",
            appointment_id, patient_id, case.capture_mode
        );

        let media = self.upload_media(&appointment_id, &case).await?;
        debug!(
            "Uploaded {} images, audio and {} video for {}",
            media.image_paths.len(),
            if media.video_path.is_some() { "a" } else { "no" },
            appointment_id
        );

        let enrichment = self
            .enrichment
            .run(Bytes::from(case.audio.data.clone()), &case.audio.mime_type);
        let job = async {
            match (reconstruction, &case.video) {
                (Some(service), Some(video)) => service
                    .start_job(Bytes::from(video.data.clone()), &video.mime_type, &self.options)
                    .await
                    .map(Some),
                _ => Ok(None),
            }
        };
        let (outcome, job) = tokio::join!(enrichment, job);
        let job = job.map_err(|e| {
            warn!("Reconstruction job for {} could not be started: {}", appointment_id, e);
            e
        })?;

        let model_state = match &job {
            Some(_) => self
                .state_machine
                .transition(&CaseModelState::NoJob, &ModelEvent::JobStarted)?,
            None => CaseModelState::NoJob,
        };

        let appointment = NewAppointment {
            id: appointment_id,
            patient_id,
            patient_name: case.patient_name.clone(),
            patient_email: case.email.clone(),
            body_part: case.body_part.clone(),
            chief_complaint: case.chief_complaint.clone(),
            preferred_date: case.preferred_date,
            preferred_time: case.preferred_time,
        };
        let submission = NewCaseSubmission {
            id: Uuid::new_v4(),
            appointment_id,
            image_paths: media.image_paths.clone(),
            audio_path: media.audio_path.clone(),
            video_path: media.video_path.clone(),
            transcription: outcome.transcription.clone(),
            transcription_state: outcome.transcription_state,
            ai_summary: outcome.summary.clone(),
            reconstruction_job: job.clone(),
            model_status: model_state.status(),
        };

        let ids = self.records.create_case(appointment, submission).await?;
        info!(
            "Case {} submitted (submission {}, transcription {})",
            ids.appointment_id,
            ids.submission_id,
            outcome.transcription_state.as_str()
        );

        Ok(SubmissionReceipt {
            appointment_id: ids.appointment_id,
            submission_id: ids.submission_id,
            image_paths: media.image_paths,
            audio_path: media.audio_path,
            video_path: media.video_path,
            transcription_state: outcome.transcription_state,
            summary_available: outcome.summary.is_some(),
            reconstruction_job: job,
            model_state,
        })
    }

    /// 提交会话中的草稿，成功后删除草稿；失败时草稿保持不变
    pub async fn submit_draft(
        &self,
        patient_id: Uuid,
        session: &DraftSession,
    ) -> Result<SubmissionReceipt> {
        let draft = session
            .current()
            .ok_or_else(|| ScanAheadError::Validation("draft: 没有可提交的草稿".to_string()))?;
        let receipt = self.submit(patient_id, &draft).await?;
        session.discard();
        session.flush().await;
        Ok(receipt)
    }

    async fn upload_media(
        &self,
        appointment_id: &Uuid,
        case: &ValidatedCase,
    ) -> Result<UploadedMedia> {
        let images = try_join_all(
            case.images
                .iter()
                .enumerate()
                .map(|(index, bytes)| self.storage.upload_image(appointment_id, index, bytes.clone())),
        );
        let audio = self
            .storage
            .upload_audio(appointment_id, Bytes::from(case.audio.data.clone()));
        let video = async {
            match &case.video {
                Some(clip) => self
                    .storage
                    .upload_video(appointment_id, Bytes::from(clip.data.clone()), &clip.mime_type)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };

        let (image_paths, audio_path, video_path) = tokio::try_join!(images, audio, video)?;
        Ok(UploadedMedia {
            image_paths,
            audio_path,
            video_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeReconstruction, FakeSummary, FakeTranscriber};
    use crate::validation::tests::complete_draft;
    use crate::validation::ValidationRules;
    use scanahead_core::ReconstructionStatus;
    use scanahead_database::MemoryCaseRecords;
    use scanahead_storage::{
        Bucket, BucketNames, DraftStore, MemoryDraftStore, StorageBackend, StorageConfig,
    };

    struct Harness {
        storage: Arc<StorageManager>,
        records: Arc<MemoryCaseRecords>,
        reconstruction: Arc<FakeReconstruction>,
        transcriber: Arc<FakeTranscriber>,
        pipeline: SubmissionPipeline,
    }

    fn harness(transcriber: FakeTranscriber, reconstruction: FakeReconstruction) -> Harness {
        harness_on(StorageManager::in_memory(), transcriber, reconstruction)
    }

    fn harness_on(
        storage: StorageManager,
        transcriber: FakeTranscriber,
        reconstruction: FakeReconstruction,
    ) -> Harness {
        let storage = Arc::new(storage);
        let records = Arc::new(MemoryCaseRecords::new());
        let reconstruction = Arc::new(reconstruction);
        let transcriber = Arc::new(transcriber);
        let pipeline = SubmissionPipeline::new(
            DraftValidator::new(ValidationRules::default()).unwrap(),
            storage.clone(),
            records.clone(),
            EnrichmentPipeline::new(Some(transcriber.clone()), Some(Arc::new(FakeSummary::ok()))),
            Some(reconstruction.clone()),
            ReconstructionOptions::default(),
        );
        Harness {
            storage,
            records,
            reconstruction,
            transcriber,
            pipeline,
        }
    }

    #[tokio::test]
    async fn test_photos_submission_creates_one_case() {
        let h = harness(
            FakeTranscriber::returning("my knee hurts"),
            FakeReconstruction::new(ReconstructionStatus::Queued),
        );
        let receipt = h
            .pipeline
            .submit(Uuid::new_v4(), &complete_draft(CaptureMode::Photos))
            .await
            .unwrap();

        assert_eq!(receipt.image_paths.len(), 5);
        assert_eq!(receipt.image_paths[4], format!("{}/5.jpg", receipt.appointment_id));
        assert!(receipt.reconstruction_job.is_none());
        assert_eq!(receipt.model_state, CaseModelState::NoJob);
        assert_eq!(FakeReconstruction::count(&h.reconstruction.starts), 0);

        assert_eq!(h.records.appointment_count().await, 1);
        assert_eq!(h.records.submission_count().await, 1);
        let case = h.records.get_case(&receipt.appointment_id).await.unwrap().unwrap();
        let submission = case.submission.unwrap();
        assert_eq!(submission.id, receipt.submission_id);
        assert_eq!(submission.transcription.as_deref(), Some("my knee hurts"));
        assert!(submission.ai_summary.is_some());
        assert_eq!(submission.model_status, None);
    }

    #[tokio::test]
    async fn test_video_submission_starts_job() {
        let h = harness(
            FakeTranscriber::returning("rash"),
            FakeReconstruction::new(ReconstructionStatus::Queued),
        );
        let receipt = h
            .pipeline
            .submit(Uuid::new_v4(), &complete_draft(CaptureMode::Video))
            .await
            .unwrap();

        assert!(receipt.image_paths.is_empty());
        assert_eq!(
            receipt.video_path,
            Some(format!("{}/case-video.mp4", receipt.appointment_id))
        );
        assert_eq!(receipt.reconstruction_job.as_ref().map(|j| j.as_str()), Some("serial-1"));
        assert_eq!(receipt.model_state, CaseModelState::Queued);

        let submission = h
            .records
            .get_submission(&receipt.submission_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.model_status, Some(ReconstructionStatus::Queued));
        assert!(h
            .storage
            .exists(Bucket::Video, receipt.video_path.as_deref().unwrap())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_upload_failure_aborts_submission() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(StorageConfig {
            backend: StorageBackend::Local {
                root_path: dir.path().to_string_lossy().to_string(),
            },
            buckets: BucketNames::default(),
        })
        .await
        .unwrap();
        // 语音桶目录换成普通文件，写入必然失败
        let audio_dir = dir.path().join("voice-notes");
        std::fs::remove_dir_all(&audio_dir).unwrap();
        std::fs::write(&audio_dir, b"not a directory").unwrap();

        let h = harness_on(
            storage,
            FakeTranscriber::returning("swelling"),
            FakeReconstruction::new(ReconstructionStatus::Queued),
        );
        let err = h
            .pipeline
            .submit(Uuid::new_v4(), &complete_draft(CaptureMode::Video))
            .await
            .unwrap_err();

        assert!(matches!(err, ScanAheadError::Upload(_)));
        assert_eq!(h.records.appointment_count().await, 0);
        assert_eq!(h.records.submission_count().await, 0);
        assert_eq!(FakeReconstruction::count(&h.reconstruction.starts), 0);
        assert_eq!(h.transcriber.calls(), 0);
    }

    #[tokio::test]
    async fn test_transcription_failure_does_not_block() {
        let h = harness(
            FakeTranscriber::failing(),
            FakeReconstruction::new(ReconstructionStatus::Queued),
        );
        let receipt = h
            .pipeline
            .submit(Uuid::new_v4(), &complete_draft(CaptureMode::Photos))
            .await
            .unwrap();

        assert_eq!(receipt.transcription_state, TranscriptionState::Failed);
        assert!(!receipt.summary_available);
        let submission = h
            .records
            .get_submission(&receipt.submission_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.transcription, None);
        assert_eq!(submission.transcription_display(), "Pending transcription");
    }

    #[tokio::test]
    async fn test_job_start_failure_aborts_video_submission() {
        let h = harness(FakeTranscriber::returning("rash"), FakeReconstruction::failing_start());
        let err = h
            .pipeline
            .submit(Uuid::new_v4(), &complete_draft(CaptureMode::Video))
            .await
            .unwrap_err();

        assert!(matches!(err, ScanAheadError::JobStart(_)));
        assert_eq!(h.records.appointment_count().await, 0);
        assert_eq!(h.records.submission_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_draft_makes_no_calls() {
        let h = harness(
            FakeTranscriber::returning("rash"),
            FakeReconstruction::new(ReconstructionStatus::Queued),
        );
        let mut draft = complete_draft(CaptureMode::Video);
        draft.video = None;

        let err = h.pipeline.submit(Uuid::new_v4(), &draft).await.unwrap_err();
        assert!(matches!(err, ScanAheadError::Validation(ref m) if m.contains("video")));
        assert_eq!(h.transcriber.calls(), 0);
        assert_eq!(FakeReconstruction::count(&h.reconstruction.starts), 0);
        assert_eq!(h.records.appointment_count().await, 0);
    }

    #[tokio::test]
    async fn test_submit_draft_clears_only_on_success() {
        let h = harness(
            FakeTranscriber::returning("rash"),
            FakeReconstruction::new(ReconstructionStatus::Queued),
        );
        let store = Arc::new(MemoryDraftStore::new());
        let session = DraftSession::open(store.clone()).await;

        let mut incomplete = complete_draft(CaptureMode::Photos);
        incomplete.audio = None;
        session.replace(incomplete);
        session.flush().await;
        assert!(h.pipeline.submit_draft(Uuid::new_v4(), &session).await.is_err());
        assert!(store.load().await.is_some());

        session.replace(complete_draft(CaptureMode::Photos));
        h.pipeline.submit_draft(Uuid::new_v4(), &session).await.unwrap();
        assert!(session.current().is_none());
        assert!(store.load().await.is_none());
    }
}
