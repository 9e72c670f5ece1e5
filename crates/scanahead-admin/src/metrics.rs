//! Prometheus指标

use anyhow::Result;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::time::{Duration, Instant};
use tracing::debug;

/// 业务与HTTP指标
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    http_requests_total: IntCounter,
    http_request_duration: Histogram,
    submissions_total: IntCounterVec,
    enrichment_total: IntCounterVec,
    status_polls_total: IntCounterVec,
    model_resolutions_total: IntCounterVec,
    proxy_downloads_total: IntCounterVec,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounter::with_opts(Opts::new(
            "scanahead_http_requests_total",
            "Total number of HTTP requests",
        ))?;

        let http_request_duration = Histogram::with_opts(HistogramOpts::new(
            "scanahead_http_request_duration_seconds",
            "HTTP request duration in seconds",
        ))?;

        let submissions_total = IntCounterVec::new(
            Opts::new("scanahead_submissions_total", "Case submissions by outcome"),
            &["outcome"],
        )?;

        let enrichment_total = IntCounterVec::new(
            Opts::new(
                "scanahead_enrichment_total",
                "Transcription results recorded on submissions",
            ),
            &["state"],
        )?;

        let status_polls_total = IntCounterVec::new(
            Opts::new(
                "scanahead_reconstruction_status_checks_total",
                "Reconstruction status checks by observed state",
            ),
            &["state"],
        )?;

        let model_resolutions_total = IntCounterVec::new(
            Opts::new(
                "scanahead_model_resolutions_total",
                "Model resolutions by outcome",
            ),
            &["outcome"],
        )?;

        let proxy_downloads_total = IntCounterVec::new(
            Opts::new(
                "scanahead_proxy_downloads_total",
                "Archive download proxy requests by outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(enrichment_total.clone()))?;
        registry.register(Box::new(status_polls_total.clone()))?;
        registry.register(Box::new(model_resolutions_total.clone()))?;
        registry.register(Box::new(proxy_downloads_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            submissions_total,
            enrichment_total,
            status_polls_total,
            model_resolutions_total,
            proxy_downloads_total,
            started_at: Instant::now(),
        })
    }

    /// 记录HTTP请求
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        debug!("HTTP request: {} {} - {} in {:?}", method, path, status, duration);
        self.http_requests_total.inc();
        self.http_request_duration.observe(duration.as_secs_f64());
    }

    pub fn record_submission(&self, outcome: &str) {
        self.submissions_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_enrichment(&self, state: &str) {
        self.enrichment_total.with_label_values(&[state]).inc();
    }

    pub fn record_status_check(&self, state: &str) {
        self.status_polls_total.with_label_values(&[state]).inc();
    }

    pub fn record_model_resolution(&self, outcome: &str) {
        self.model_resolutions_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_proxy_download(&self, outcome: &str) {
        self.proxy_downloads_total.with_label_values(&[outcome]).inc();
    }

    /// 以文本格式导出
    pub fn render(&self) -> Result<String> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
