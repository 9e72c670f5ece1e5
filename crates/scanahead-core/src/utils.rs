//! 通用工具函数

use crate::error::{Result, ScanAheadError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use uuid::Uuid;

/// 语音备注的固定文件名
pub const VOICE_NOTE_FILE: &str = "voice-note.webm";
/// 三维模型的规范文件名
pub const MODEL_FILE: &str = "model.glb";
/// GLB 二进制模型的 MIME 类型
pub const GLB_CONTENT_TYPE: &str = "model/gltf-binary";

/// 第 `index` 张照片（从0开始）的存储路径，文件名从1开始编号
pub fn image_path(appointment_id: &Uuid, index: usize) -> String {
    format!("{}/{}.jpg", appointment_id, index + 1)
}

pub fn audio_path(appointment_id: &Uuid) -> String {
    format!("{}/{}", appointment_id, VOICE_NOTE_FILE)
}

pub fn video_path(appointment_id: &Uuid, extension: &str) -> String {
    format!("{}/case-video.{}", appointment_id, extension)
}

pub fn model_path(appointment_id: &Uuid) -> String {
    format!("{}/{}", appointment_id, MODEL_FILE)
}

/// 根据视频声明的 MIME 类型推断扩展名，无法识别时默认 webm
pub fn resolve_video_extension(mime_type: &str) -> &'static str {
    let mime = mime_type.to_ascii_lowercase();
    if mime.contains("webm") {
        "webm"
    } else if mime.contains("mp4") {
        "mp4"
    } else if mime.contains("quicktime") {
        "mov"
    } else {
        "webm"
    }
}

/// 视频上传时使用的 Content-Type
pub fn video_content_type(mime_type: &str) -> String {
    if mime_type.trim().is_empty() {
        format!("video/{}", resolve_video_extension(mime_type))
    } else {
        mime_type.to_string()
    }
}

/// 解析 `data:<mime>;base64,<payload>` 形式的内联图片
///
/// 返回声明的 MIME 类型与解码后的字节；不带前缀时按纯 base64 处理。
pub fn decode_data_url(data_url: &str) -> Result<(Option<String>, Vec<u8>)> {
    let (mime, payload) = match data_url.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| ScanAheadError::Validation("图片数据格式无效".to_string()))?;
            if !header.ends_with(";base64") {
                return Err(ScanAheadError::Validation(
                    "图片数据必须是 base64 编码".to_string(),
                ));
            }
            let mime = header.trim_end_matches(";base64");
            let mime = (!mime.is_empty()).then(|| mime.to_string());
            (mime, payload)
        }
        None => (None, data_url),
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ScanAheadError::Validation(format!("图片数据无法解码: {}", e)))?;
    Ok((mime, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_paths() {
        let id = Uuid::nil();
        assert_eq!(image_path(&id, 0), format!("{}/1.jpg", id));
        assert_eq!(audio_path(&id), format!("{}/voice-note.webm", id));
        assert_eq!(video_path(&id, "mov"), format!("{}/case-video.mov", id));
        assert_eq!(model_path(&id), format!("{}/model.glb", id));
    }

    #[test]
    fn test_resolve_video_extension() {
        assert_eq!(resolve_video_extension("video/webm;codecs=vp9"), "webm");
        assert_eq!(resolve_video_extension("video/MP4"), "mp4");
        assert_eq!(resolve_video_extension("video/quicktime"), "mov");
        assert_eq!(resolve_video_extension(""), "webm");
        assert_eq!(video_content_type(""), "video/webm");
        assert_eq!(video_content_type("video/mp4"), "video/mp4");
    }

    #[test]
    fn test_decode_data_url() {
        let (mime, bytes) = decode_data_url("data:image/jpeg;base64,/9j/").unwrap();
        assert_eq!(mime.as_deref(), Some("image/jpeg"));
        assert_eq!(bytes, vec![0xff, 0xd8, 0xff]);

        assert!(decode_data_url("data:image/jpeg,notbase64").is_err());
        assert!(decode_data_url("data:image/jpeg;base64,@@@").is_err());
    }
}
