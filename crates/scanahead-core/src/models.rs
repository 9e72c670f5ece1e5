//! 核心数据模型定义

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 采集方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    Photos, // 多角度照片
    Video,  // 单段短视频
}

/// 预约表单草稿（表单输入的原始字符串）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDraft {
    pub patient_name: String,
    pub email: String,
    pub preferred_date: String, // YYYY-MM-DD
    pub preferred_time: String, // HH:MM
    pub chief_complaint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_type: Option<String>,
}

/// 采集到的单张照片
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapturedImage {
    pub id: String,
    pub angle: String,    // 拍摄角度标签，如 "Front"、"Left 45°"
    pub data_url: String, // data:image/jpeg;base64,...
}

/// 音频或视频片段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaClip {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl MediaClip {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 本地草稿
///
/// 每个客户端同一时间只有一份草稿；首次编辑时创建，每次修改整体覆盖，
/// 提交成功或主动丢弃后删除。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub appointment: AppointmentDraft,
    pub body_part: String,
    pub images: Vec<CapturedImage>,
    pub audio: Option<MediaClip>,
    pub video: Option<MediaClip>,
    pub capture_mode: CaptureMode,
    pub updated_at: DateTime<Utc>,
}

impl Draft {
    pub fn new() -> Self {
        Self {
            appointment: AppointmentDraft::default(),
            body_part: String::new(),
            images: Vec::new(),
            audio: None,
            video: None,
            capture_mode: CaptureMode::Photos,
            updated_at: Utc::now(),
        }
    }

    /// 刷新修改时间
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// 切换采集方式，同时丢弃另一种方式的媒体
    pub fn set_capture_mode(&mut self, mode: CaptureMode) {
        self.capture_mode = mode;
        match mode {
            CaptureMode::Video => self.images.clear(),
            CaptureMode::Photos => self.video = None,
        }
    }

    /// 恢复草稿时按采集方式剔除不匹配的媒体
    pub fn normalized(mut self) -> Self {
        match self.capture_mode {
            CaptureMode::Photos => self.video = None,
            CaptureMode::Video => self.images.clear(),
        }
        self
    }
}

impl Default for Draft {
    fn default() -> Self {
        Self::new()
    }
}

/// 预约状态，仅由审核人员在创建后修改
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Submitted, // 已提交
    Reviewing, // 审核中
    Completed, // 已完成
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Submitted => "submitted",
            AppointmentStatus::Reviewing => "reviewing",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "submitted" => Some(AppointmentStatus::Submitted),
            "reviewing" => Some(AppointmentStatus::Reviewing),
            "completed" => Some(AppointmentStatus::Completed),
            _ => None,
        }
    }
}

/// 预约信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_email: String,
    pub body_part: String,
    pub chief_complaint: String,
    pub preferred_date: NaiveDate,
    pub preferred_time: NaiveTime,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

/// 语音转写后生成的结构化临床摘要
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicalSummary {
    pub symptoms: Vec<String>,
    pub duration: String,
    pub severity: String,
    pub concerns: String,
}

/// 摘要服务可能只返回部分字段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialClinicalSummary {
    pub symptoms: Option<Vec<String>>,
    pub duration: Option<String>,
    pub severity: Option<String>,
    pub concerns: Option<String>,
}

impl From<PartialClinicalSummary> for ClinicalSummary {
    fn from(partial: PartialClinicalSummary) -> Self {
        ClinicalSummary {
            symptoms: partial.symptoms.unwrap_or_default(),
            duration: partial.duration.unwrap_or_else(|| "Unknown".to_string()),
            severity: partial.severity.unwrap_or_else(|| "Unknown".to_string()),
            concerns: partial.concerns.unwrap_or_else(|| "None noted".to_string()),
        }
    }
}

/// 转写结果的可用状态
///
/// `Unconfigured` 与 `Failed` 对应“尚不可用”（界面显示 Pending transcription），
/// `Empty` 表示已转写但没有文字。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionState {
    Unconfigured,
    Failed,
    Empty,
    Available,
}

impl TranscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionState::Unconfigured => "unconfigured",
            TranscriptionState::Failed => "failed",
            TranscriptionState::Empty => "empty",
            TranscriptionState::Available => "available",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unconfigured" => Some(TranscriptionState::Unconfigured),
            "failed" => Some(TranscriptionState::Failed),
            "empty" => Some(TranscriptionState::Empty),
            "available" => Some(TranscriptionState::Available),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TranscriptionState::Unconfigured | TranscriptionState::Failed)
    }
}

/// 三维重建任务句柄（外部服务返回的不透明标识）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 三维重建任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReconstructionStatus {
    Queued,     // 排队中
    Processing, // 处理中
    Uploading,  // 上传中
    Failed,     // 失败
    Succeeded,  // 成功
    Expired,    // 已过期
    Unknown,    // 无法识别的返回
}

impl ReconstructionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconstructionStatus::Queued => "QUEUED",
            ReconstructionStatus::Processing => "PROCESSING",
            ReconstructionStatus::Uploading => "UPLOADING",
            ReconstructionStatus::Failed => "FAILED",
            ReconstructionStatus::Succeeded => "SUCCEEDED",
            ReconstructionStatus::Expired => "EXPIRED",
            ReconstructionStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "QUEUED" => ReconstructionStatus::Queued,
            "PROCESSING" => ReconstructionStatus::Processing,
            "UPLOADING" => ReconstructionStatus::Uploading,
            "FAILED" => ReconstructionStatus::Failed,
            "SUCCEEDED" => ReconstructionStatus::Succeeded,
            "EXPIRED" => ReconstructionStatus::Expired,
            _ => ReconstructionStatus::Unknown,
        }
    }

    /// 界面展示用标签
    pub fn label(&self) -> &'static str {
        match self {
            ReconstructionStatus::Uploading => "Uploading",
            ReconstructionStatus::Processing => "Processing",
            ReconstructionStatus::Failed => "Failed",
            ReconstructionStatus::Succeeded => "Successful",
            ReconstructionStatus::Queued => "Queuing",
            ReconstructionStatus::Expired => "Expired",
            ReconstructionStatus::Unknown => "Pending",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconstructionStatus::Failed
                | ReconstructionStatus::Succeeded
                | ReconstructionStatus::Expired
        )
    }
}

/// 病例提交记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSubmission {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub image_paths: Vec<String>,
    pub audio_path: String,
    pub video_path: Option<String>,
    pub transcription: Option<String>,
    pub transcription_state: TranscriptionState,
    pub ai_summary: Option<ClinicalSummary>,
    pub reconstruction_job: Option<JobHandle>,
    pub model_path: Option<String>,
    pub model_status: Option<ReconstructionStatus>,
    pub doctor_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CaseSubmission {
    /// 转写文字的展示文本
    pub fn transcription_display(&self) -> &str {
        match &self.transcription {
            Some(text) => text,
            None => "Pending transcription",
        }
    }
}

/// 预约与其病例提交的联合视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDetail {
    pub appointment: Appointment,
    pub submission: Option<CaseSubmission>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switching_capture_mode_drops_other_media() {
        let mut draft = Draft::new();
        draft.images.push(CapturedImage {
            id: "1".into(),
            angle: "Front".into(),
            data_url: "data:image/jpeg;base64,AAAA".into(),
        });
        draft.set_capture_mode(CaptureMode::Video);
        assert!(draft.images.is_empty());

        draft.video = Some(MediaClip::new("video/mp4", vec![1, 2, 3]));
        draft.set_capture_mode(CaptureMode::Photos);
        assert!(draft.video.is_none());
    }

    #[test]
    fn test_media_clip_serializes_as_base64() {
        let clip = MediaClip::new("audio/webm", b"voice".to_vec());
        let json = serde_json::to_value(&clip).unwrap();
        assert_eq!(json["mimeType"], "audio/webm");
        assert_eq!(json["data"], "dm9pY2U=");

        let back: MediaClip = serde_json::from_value(json).unwrap();
        assert_eq!(back, clip);
    }

    #[test]
    fn test_partial_summary_defaults() {
        let summary = ClinicalSummary::from(PartialClinicalSummary {
            symptoms: Some(vec!["itching".into()]),
            ..Default::default()
        });
        assert_eq!(summary.symptoms, vec!["itching".to_string()]);
        assert_eq!(summary.duration, "Unknown");
        assert_eq!(summary.severity, "Unknown");
        assert_eq!(summary.concerns, "None noted");
    }

    #[test]
    fn test_status_labels_and_storage_names() {
        assert_eq!(ReconstructionStatus::Queued.label(), "Queuing");
        assert_eq!(ReconstructionStatus::Unknown.label(), "Pending");
        assert_eq!(ReconstructionStatus::parse("SUCCEEDED"), ReconstructionStatus::Succeeded);
        assert_eq!(ReconstructionStatus::parse("garbage"), ReconstructionStatus::Unknown);
        assert!(ReconstructionStatus::Expired.is_terminal());
        assert!(!ReconstructionStatus::Unknown.is_terminal());
    }
}
