//! 测试用的外部服务替身

use async_trait::async_trait;
use bytes::Bytes;
use scanahead_core::{ClinicalSummary, JobHandle, ReconstructionStatus, Result, ScanAheadError};
use scanahead_integration::{
    ArchiveFetcher, ReconstructionOptions, ReconstructionService, SummaryService,
    TranscriptionService,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct FakeTranscriber {
    text: Option<String>,
    calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn returning(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionService for FakeTranscriber {
    async fn transcribe(&self, _audio: Bytes, _mime_type: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.text
            .clone()
            .ok_or_else(|| ScanAheadError::Enrichment("stt unavailable".to_string()))
    }
}

pub struct FakeSummary {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeSummary {
    pub fn ok() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummaryService for FakeSummary {
    async fn summarize(&self, _text: &str) -> Result<ClinicalSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ScanAheadError::Enrichment("summary unavailable".to_string()));
        }
        Ok(ClinicalSummary {
            symptoms: vec!["knee pain".to_string()],
            duration: "2 weeks".to_string(),
            severity: "Moderate".to_string(),
            concerns: "None noted".to_string(),
        })
    }
}

pub struct FakeReconstruction {
    start_fails: bool,
    status: Mutex<ReconstructionStatus>,
    location: Option<String>,
    pub starts: AtomicUsize,
    pub polls: AtomicUsize,
    pub locations: AtomicUsize,
}

impl FakeReconstruction {
    pub fn new(status: ReconstructionStatus) -> Self {
        Self {
            start_fails: false,
            status: Mutex::new(status),
            location: Some("https://cdn.example.com/model.zip".to_string()),
            starts: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            locations: AtomicUsize::new(0),
        }
    }

    pub fn failing_start() -> Self {
        Self {
            start_fails: true,
            ..Self::new(ReconstructionStatus::Queued)
        }
    }

    pub fn set_status(&self, status: ReconstructionStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReconstructionService for FakeReconstruction {
    async fn start_job(
        &self,
        _video: Bytes,
        _mime_type: &str,
        _options: &ReconstructionOptions,
    ) -> Result<JobHandle> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.start_fails {
            return Err(ScanAheadError::JobStart("quota exceeded".to_string()));
        }
        Ok(JobHandle::new("serial-1"))
    }

    async fn poll_status(&self, _job: &JobHandle) -> Result<ReconstructionStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.status.lock().unwrap())
    }

    async fn fetch_result_location(&self, _job: &JobHandle) -> Result<String> {
        self.locations.fetch_add(1, Ordering::SeqCst);
        self.location
            .clone()
            .ok_or_else(|| ScanAheadError::ModelNotReady("no url".to_string()))
    }
}

pub struct FakeFetcher {
    archive: Vec<u8>,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(archive: Vec<u8>) -> Self {
        Self {
            archive,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveFetcher for FakeFetcher {
    async fn fetch_archive(&self, _url: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(self.archive.clone()))
    }
}

/// 构建 zip 测试数据
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
