//! 草稿提交前校验
//!
//! 校验在任何上传或外部调用之前完成，并把表单字符串解析成提交所需的类型。

use bytes::Bytes;
use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use scanahead_core::utils::decode_data_url;
use scanahead_core::{CaptureMode, Draft, MediaClip, Result, ScanAheadError};
use serde::{Deserialize, Serialize};

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// 校验规则
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    /// 照片模式最少张数
    pub min_images: usize,
    /// 照片模式最多张数
    pub max_images: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_images: 5,
            max_images: 7,
        }
    }
}

/// 通过校验的病例
#[derive(Debug, Clone)]
pub struct ValidatedCase {
    pub patient_name: String,
    pub email: String,
    pub preferred_date: NaiveDate,
    pub preferred_time: NaiveTime,
    pub chief_complaint: String,
    pub body_part: String,
    pub capture_mode: CaptureMode,
    /// 解码后的照片，按拍摄顺序
    pub images: Vec<Bytes>,
    pub audio: MediaClip,
    pub video: Option<MediaClip>,
}

/// 草稿校验器
pub struct DraftValidator {
    rules: ValidationRules,
    email: Regex,
}

impl DraftValidator {
    pub fn new(rules: ValidationRules) -> Result<Self> {
        let email = Regex::new(EMAIL_PATTERN)
            .map_err(|e| ScanAheadError::Internal(format!("邮箱规则无效: {}", e)))?;
        Ok(Self { rules, email })
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// 校验草稿，所有问题一并报告
    pub fn validate(&self, draft: &Draft) -> Result<ValidatedCase> {
        let mut issues: Vec<String> = Vec::new();
        let appointment = &draft.appointment;

        if appointment.patient_name.trim().is_empty() {
            issues.push("patient_name: 请填写患者姓名".to_string());
        }
        if !self.email.is_match(appointment.email.trim()) {
            issues.push("email: 邮箱格式无效".to_string());
        }
        let preferred_date = NaiveDate::parse_from_str(appointment.preferred_date.trim(), "%Y-%m-%d")
            .map_err(|_| issues.push("preferred_date: 请选择预约日期".to_string()))
            .ok();
        let preferred_time = NaiveTime::parse_from_str(appointment.preferred_time.trim(), "%H:%M")
            .map_err(|_| issues.push("preferred_time: 请选择预约时间".to_string()))
            .ok();
        if draft.body_part.trim().is_empty() {
            issues.push("body_part: 请选择身体部位".to_string());
        }

        let mut images = Vec::new();
        let mut video = None;
        match draft.capture_mode {
            CaptureMode::Photos => {
                let count = draft.images.len();
                if count < self.rules.min_images {
                    issues.push(format!(
                        "images: 至少需要 {} 张照片，当前 {} 张",
                        self.rules.min_images, count
                    ));
                } else if count > self.rules.max_images {
                    issues.push(format!(
                        "images: 最多 {} 张照片，当前 {} 张",
                        self.rules.max_images, count
                    ));
                }
                for (index, image) in draft.images.iter().enumerate() {
                    match decode_data_url(&image.data_url) {
                        Ok((_, bytes)) if !bytes.is_empty() => images.push(Bytes::from(bytes)),
                        Ok(_) => issues.push(format!("images[{}]: 照片为空", index)),
                        Err(e) => issues.push(format!("images[{}]: {}", index, e)),
                    }
                }
            }
            CaptureMode::Video => match &draft.video {
                Some(clip) if !clip.is_empty() => video = Some(clip.clone()),
                _ => issues.push("video: 视频模式需要录制一段视频".to_string()),
            },
        }

        let audio = match &draft.audio {
            Some(clip) if !clip.is_empty() => Some(clip.clone()),
            _ => {
                issues.push("audio: 请录制语音备注".to_string());
                None
            }
        };

        match (issues.is_empty(), preferred_date, preferred_time, audio) {
            (true, Some(preferred_date), Some(preferred_time), Some(audio)) => Ok(ValidatedCase {
                patient_name: appointment.patient_name.trim().to_string(),
                email: appointment.email.trim().to_string(),
                preferred_date,
                preferred_time,
                chief_complaint: appointment.chief_complaint.trim().to_string(),
                body_part: draft.body_part.trim().to_string(),
                capture_mode: draft.capture_mode,
                images,
                audio,
                video,
            }),
            _ => Err(ScanAheadError::Validation(issues.join("; "))),
        }
    }
}
