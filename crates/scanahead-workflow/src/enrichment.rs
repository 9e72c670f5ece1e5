//! 增强管线：语音转写，然后生成临床摘要
//!
//! 两个阶段都是尽力而为，任何失败只记录日志，不会让提交失败。

use bytes::Bytes;
use scanahead_core::{ClinicalSummary, TranscriptionState};
use scanahead_integration::{SummaryService, TranscriptionService};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 增强结果
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentOutcome {
    pub transcription: Option<String>,
    pub transcription_state: TranscriptionState,
    pub summary: Option<ClinicalSummary>,
}

impl EnrichmentOutcome {
    fn without_transcript(state: TranscriptionState) -> Self {
        Self {
            transcription: None,
            transcription_state: state,
            summary: None,
        }
    }
}

/// 增强管线，未配置的服务对应阶段直接跳过
#[derive(Clone, Default)]
pub struct EnrichmentPipeline {
    transcriber: Option<Arc<dyn TranscriptionService>>,
    summarizer: Option<Arc<dyn SummaryService>>,
}

impl EnrichmentPipeline {
    pub fn new(
        transcriber: Option<Arc<dyn TranscriptionService>>,
        summarizer: Option<Arc<dyn SummaryService>>,
    ) -> Self {
        Self {
            transcriber,
            summarizer,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn run(&self, audio: Bytes, mime_type: &str) -> EnrichmentOutcome {
        let Some(transcriber) = &self.transcriber else {
            debug!("Transcription not configured, skipping enrichment");
            return EnrichmentOutcome::without_transcript(TranscriptionState::Unconfigured);
        };

        let text = match transcriber.transcribe(audio, mime_type).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Transcription failed, continuing without transcript: {}", e);
                return EnrichmentOutcome::without_transcript(TranscriptionState::Failed);
            }
        };

        if text.trim().is_empty() {
            info!("Transcription returned no text");
            return EnrichmentOutcome {
                transcription: Some(text),
                transcription_state: TranscriptionState::Empty,
                summary: None,
            };
        }

        let summary = match &self.summarizer {
            Some(summarizer) => match summarizer.summarize(&text).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("Summary failed, continuing without summary: {}", e);
                    None
                }
            },
            None => None,
        };

        info!(
            "Enrichment finished ({} chars transcribed, summary: {})",
            text.chars().count(),
            summary.is_some()
        );
        EnrichmentOutcome {
            transcription: Some(text),
            transcription_state: TranscriptionState::Available,
            summary,
        }
    }
}
