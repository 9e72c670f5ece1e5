//! 重建结果压缩包解析

use bytes::Bytes;
use scanahead_core::utils::GLB_CONTENT_TYPE;
use scanahead_core::{Result, ScanAheadError};
use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

/// 按条目声明大小预分配的上限，超出部分随读取增长
const PREALLOC_LIMIT: u64 = 8 * 1024 * 1024;

/// 从压缩包中取出的模型文件
#[derive(Debug, Clone)]
pub struct ExtractedModel {
    /// 压缩包内的条目名称
    pub entry_name: String,
    pub bytes: Bytes,
    pub content_type: &'static str,
}

/// 从 zip 压缩包中取出第一个 `.glb` 模型
///
/// 按条目顺序匹配，扩展名不区分大小写。没有 `.glb` 条目时返回 `NotFound`，
/// 压缩包无法解析时返回 `Extraction`。
pub fn extract_model(archive: &[u8]) -> Result<ExtractedModel> {
    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| ScanAheadError::Extraction(e.to_string()))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| ScanAheadError::Extraction(e.to_string()))?;
        if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".glb") {
            continue;
        }

        let entry_name = entry.name().to_string();
        let mut data = Vec::with_capacity(initial_capacity(entry.size()));
        entry
            .read_to_end(&mut data)
            .map_err(|e| ScanAheadError::Extraction(format!("{}: {}", entry_name, e)))?;

        debug!("Extracted {} ({} bytes) from archive", entry_name, data.len());
        return Ok(ExtractedModel {
            entry_name,
            bytes: Bytes::from(data),
            content_type: GLB_CONTENT_TYPE,
        });
    }

    Err(ScanAheadError::NotFound("压缩包中没有 .glb 模型".to_string()))
}

/// 条目头中的大小不可信
fn initial_capacity(declared: u64) -> usize {
    usize::try_from(declared.min(PREALLOC_LIMIT)).unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_picks_glb_case_insensitively() {
        let archive = build_zip(&[
            ("textures/diffuse.png", b"png"),
            ("model.GLB", b"glTF-binary"),
        ]);

        let model = extract_model(&archive).unwrap();
        assert_eq!(model.entry_name, "model.GLB");
        assert_eq!(model.bytes.as_ref(), b"glTF-binary");
        assert_eq!(model.content_type, "model/gltf-binary");
    }

    #[test]
    fn test_first_glb_wins() {
        let archive = build_zip(&[("a/first.glb", b"one"), ("second.glb", b"two")]);
        assert_eq!(extract_model(&archive).unwrap().entry_name, "a/first.glb");
    }

    #[test]
    fn test_archive_without_glb() {
        let archive = build_zip(&[("model.obj", b"v 0 0 0"), ("readme.txt", b"hi")]);
        let err = extract_model(&archive).unwrap_err();
        assert!(matches!(err, ScanAheadError::NotFound(_)));
    }

    #[test]
    fn test_declared_size_does_not_drive_allocation() {
        assert_eq!(initial_capacity(0), 0);
        assert_eq!(initial_capacity(1024), 1024);
        assert_eq!(initial_capacity(u64::MAX), PREALLOC_LIMIT as usize);

        let large = vec![7u8; PREALLOC_LIMIT as usize + 16];
        let archive = build_zip(&[("big.glb", large.as_slice())]);
        let model = extract_model(&archive).unwrap();
        assert_eq!(model.bytes.len(), large.len());
    }

    #[test]
    fn test_corrupt_archive() {
        let err = extract_model(b"definitely not a zip").unwrap_err();
        assert!(matches!(err, ScanAheadError::Extraction(_)));
    }
}
