//! 病例提交演示程序
//!
//! 展示一次完整的视频模式提交：
//! - 编辑并持久化本地草稿
//! - 上传媒体、转写语音、启动三维重建
//! - 用户触发的状态查询与模型下载

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use scanahead::core::{
    CaptureMode, ClinicalSummary, JobHandle, MediaClip, ReconstructionStatus, ScanAheadError,
};
use scanahead::database::{CaseRecords, MemoryCaseRecords};
use scanahead::integration::{
    ArchiveFetcher, ReconstructionOptions, ReconstructionService, SummaryService,
    TranscriptionService,
};
use scanahead::admin::DraftConfig;
use scanahead::storage::StorageManager;
use scanahead::workflow::{
    DraftValidator, EnrichmentPipeline, ModelResolver, SubmissionPipeline, ValidationRules,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// 本地转写服务
struct EchoTranscriber;

#[async_trait]
impl TranscriptionService for EchoTranscriber {
    async fn transcribe(&self, audio: Bytes, mime_type: &str) -> scanahead::core::Result<String> {
        info!("Transcribing {} bytes of {}", audio.len(), mime_type);
        Ok("My left knee has been swollen for two weeks and hurts on stairs.".to_string())
    }
}

/// 本地摘要服务
struct KeywordSummary;

#[async_trait]
impl SummaryService for KeywordSummary {
    async fn summarize(&self, text: &str) -> scanahead::core::Result<ClinicalSummary> {
        let symptoms = ["swollen", "hurts", "pain"]
            .iter()
            .filter(|word| text.contains(*word))
            .map(|word| word.to_string())
            .collect();
        Ok(ClinicalSummary {
            symptoms,
            duration: "2 weeks".to_string(),
            severity: "Moderate".to_string(),
            concerns: "None noted".to_string(),
        })
    }
}

/// 第二次查询起返回成功的重建服务
struct ScriptedReconstruction {
    polls: AtomicUsize,
}

#[async_trait]
impl ReconstructionService for ScriptedReconstruction {
    async fn start_job(
        &self,
        video: Bytes,
        _mime_type: &str,
        options: &ReconstructionOptions,
    ) -> scanahead::core::Result<JobHandle> {
        info!("Starting job for {} bytes ({})", video.len(), options.file_format);
        Ok(JobHandle::new(format!("demo-{}", Uuid::new_v4().simple())))
    }

    async fn poll_status(&self, _job: &JobHandle) -> scanahead::core::Result<ReconstructionStatus> {
        match self.polls.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(ReconstructionStatus::Processing),
            _ => Ok(ReconstructionStatus::Succeeded),
        }
    }

    async fn fetch_result_location(&self, job: &JobHandle) -> scanahead::core::Result<String> {
        Ok(format!("https://models.example.com/{}.zip", job))
    }
}

/// 生成压缩包的下载器
struct ZipFetcher;

#[async_trait]
impl ArchiveFetcher for ZipFetcher {
    async fn fetch_archive(&self, url: &str) -> scanahead::core::Result<Bytes> {
        info!("Fetching archive {}", url);
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        let mut add = |name: &str, data: &[u8]| -> std::io::Result<()> {
            writer.start_file(name, options).map_err(std::io::Error::other)?;
            writer.write_all(data)
        };
        add("textures/diffuse.png", b"\x89PNG")?;
        add("model.GLB", b"glTF\x02\x00\x00\x00")?;
        let cursor = writer
            .finish()
            .map_err(|e| ScanAheadError::Extraction(e.to_string()))?;
        Ok(Bytes::from(cursor.into_inner()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("🩺 ScanAhead病例提交演示");
    println!("================================");

    let drafts = DraftConfig {
        dir: std::env::temp_dir().join("scanahead-demo"),
        ..DraftConfig::default()
    };
    let session = drafts.open_session().await;

    println!("\n📝 编辑草稿...");
    session.update(|draft| {
        draft.appointment.patient_name = "Ada Lovelace".to_string();
        draft.appointment.email = "ada@example.com".to_string();
        draft.appointment.preferred_date = "2026-11-02".to_string();
        draft.appointment.preferred_time = "09:30".to_string();
        draft.appointment.chief_complaint = "Swollen knee".to_string();
        draft.body_part = "Left knee".to_string();
    });
    session.update(|draft| {
        draft.set_capture_mode(CaptureMode::Video);
        draft.video = Some(MediaClip::new("video/webm;codecs=vp9", vec![0u8; 2048]));
        draft.audio = Some(MediaClip::new("audio/webm", vec![1u8; 512]));
    });
    session.flush().await;
    println!("  草稿已保存到 {}", drafts.dir.display());

    let storage = Arc::new(StorageManager::in_memory());
    let records = Arc::new(MemoryCaseRecords::new());
    let reconstruction: Arc<dyn ReconstructionService> = Arc::new(ScriptedReconstruction {
        polls: AtomicUsize::new(0),
    });

    let pipeline = SubmissionPipeline::new(
        DraftValidator::new(ValidationRules::default())?,
        storage.clone(),
        records.clone(),
        EnrichmentPipeline::new(Some(Arc::new(EchoTranscriber)), Some(Arc::new(KeywordSummary))),
        Some(reconstruction.clone()),
        ReconstructionOptions::default(),
    );

    println!("\n📤 提交病例...");
    let receipt = pipeline.submit_draft(Uuid::new_v4(), &session).await?;
    println!("  预约: {}", receipt.appointment_id);
    println!("  音频: {}", receipt.audio_path);
    println!("  视频: {}", receipt.video_path.as_deref().unwrap_or("-"));
    println!("  转写: {}", receipt.transcription_state.as_str());
    println!("  重建状态: {}", receipt.model_state.label());
    println!("  草稿已清除: {}", session.current().is_none());

    let resolver = ModelResolver::new(
        records.clone(),
        storage.clone(),
        Some(reconstruction),
        Arc::new(ZipFetcher),
    );

    println!("\n🔄 查询重建状态...");
    let state = resolver.check_status(&receipt.submission_id).await?;
    println!("  当前状态: {}", state.label());

    println!("\n📦 获取三维模型...");
    let resolved = resolver.resolve_model(&receipt.submission_id).await?;
    println!("  模型路径: {}", resolved.model_path);

    let again = resolver.resolve_model(&receipt.submission_id).await?;
    println!("  再次获取直接返回: {}", again.short_circuited);

    if let Some(case) = records.get_case(&receipt.appointment_id).await? {
        if let Some(submission) = case.submission {
            println!("\n📋 病例记录");
            println!("  患者: {}", case.appointment.patient_name);
            println!("  转写: {}", submission.transcription_display());
            if let Some(summary) = submission.ai_summary {
                println!("  症状: {}", summary.symptoms.join(", "));
            }
            println!(
                "  模型: {}",
                submission.model_path.as_deref().unwrap_or("-")
            );
        }
    }

    session.close().await;
    println!("\n✅ 演示完成");
    Ok(())
}
