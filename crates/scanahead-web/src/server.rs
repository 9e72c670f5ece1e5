//! Web服务器

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use scanahead_admin::Metrics;
use scanahead_database::CaseRecords;
use scanahead_workflow::{ModelResolver, SubmissionPipeline};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::handlers::{
    api_root, check_model_status, create_case, get_case, health, metrics, resolve_model,
    save_doctor_notes, update_appointment_status,
};
use crate::proxy::{download_zip, transcribe, ProxyState};

/// 提交请求携带全部媒体的 base64 编码
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub submissions: Arc<SubmissionPipeline>,
    pub resolver: Arc<ModelResolver>,
    pub records: Arc<dyn CaseRecords>,
    pub proxy: Arc<ProxyState>,
    pub metrics: Metrics,
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState, cors_origins: &[String]) -> Self {
        let app = create_app(state, cors_origins);
        Self { addr, app }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start web server: {}", e))?;

        Ok(())
    }
}

/// 构建路由
pub fn create_app(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        // 根路径
        .route("/", get(api_root))

        // 健康检查与指标
        .route("/health", get(health))
        .route("/metrics", get(metrics))

        // 同源代理
        .route("/api/reconstruction/download-zip", get(download_zip))
        .route("/api/transcribe", post(transcribe))

        // API路由
        .nest("/api/v1", api_routes())

        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))

        // 全局中间件
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
        .with_state(state)
}

/// API v1 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/cases", post(create_case))
        .route("/cases/:appointment_id", get(get_case))
        .route("/submissions/:submission_id/model-status", post(check_model_status))
        .route("/submissions/:submission_id/model", post(resolve_model))
        .route("/submissions/:submission_id/notes", put(save_doctor_notes))
        .route("/appointments/:appointment_id/status", put(update_appointment_status))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    state.metrics.record_http_request(
        method.as_str(),
        &path,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest, StatusCode};
    use http_body_util::BodyExt;
    use scanahead_admin::ProxyConfig;
    use scanahead_core::{CaptureMode, CapturedImage, Draft, MediaClip};
    use scanahead_database::MemoryCaseRecords;
    use scanahead_integration::{ArchiveFetcher, ProxyArchiveFetcher, ReconstructionOptions};
    use scanahead_storage::StorageManager;
    use scanahead_workflow::{DraftValidator, EnrichmentPipeline, ValidationRules};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_app(proxy: ProxyConfig) -> Router {
        let storage = Arc::new(StorageManager::in_memory());
        let records: Arc<dyn CaseRecords> = Arc::new(MemoryCaseRecords::new());
        let validator = DraftValidator::new(ValidationRules::default()).unwrap();
        let submissions = SubmissionPipeline::new(
            validator,
            storage.clone(),
            records.clone(),
            EnrichmentPipeline::disabled(),
            None,
            ReconstructionOptions::default(),
        );
        let fetcher: Arc<dyn ArchiveFetcher> = Arc::new(
            ProxyArchiveFetcher::new(
                "http://127.0.0.1:9/api/reconstruction/download-zip",
                Duration::from_secs(1),
            )
            .unwrap(),
        );
        let resolver = ModelResolver::new(records.clone(), storage, None, fetcher);

        let state = AppState {
            submissions: Arc::new(submissions),
            resolver: Arc::new(resolver),
            records,
            proxy: Arc::new(ProxyState::new(proxy).unwrap()),
            metrics: Metrics::new().unwrap(),
        };
        create_app(state, &[])
    }

    fn photo_draft() -> Draft {
        let mut draft = Draft::new();
        draft.appointment.patient_name = "Ada Lovelace".to_string();
        draft.appointment.email = "ada@example.com".to_string();
        draft.appointment.preferred_date = "2026-11-02".to_string();
        draft.appointment.preferred_time = "09:30".to_string();
        draft.appointment.chief_complaint = "Swollen knee".to_string();
        draft.body_part = "Left knee".to_string();
        draft.audio = Some(MediaClip::new("audio/webm", b"voice".to_vec()));
        for n in 0..5 {
            draft.images.push(CapturedImage {
                id: n.to_string(),
                angle: format!("Angle {}", n),
                data_url: "data:image/jpeg;base64,/9j/".to_string(),
            });
        }
        draft
    }

    async fn send(app: &Router, request: HttpRequest<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    fn json_request(method: &str, uri: &str, body: Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(ProxyConfig::default());
        let (status, body) = send(&app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "healthy");
    }

    #[tokio::test]
    async fn test_download_proxy_rejects_bad_targets() {
        let app = test_app(ProxyConfig {
            allowed_hosts: vec!["cdn.example.com".to_string()],
            ..ProxyConfig::default()
        });

        let (status, body) = send(&app, get_request("/api/reconstruction/download-zip")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], 400);

        let (status, _) = send(
            &app,
            get_request("/api/reconstruction/download-zip?url=ftp%3A%2F%2Fcdn.example.com%2Fmodel.zip"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            get_request("/api/reconstruction/download-zip?url=https%3A%2F%2Fevil.example.com%2Fmodel.zip"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    fn allow_loopback() -> ProxyConfig {
        ProxyConfig {
            allowed_hosts: vec!["127.0.0.1".to_string()],
            ..ProxyConfig::default()
        }
    }

    #[tokio::test]
    async fn test_download_proxy_refuses_all_hosts_by_default() {
        let app = test_app(ProxyConfig::default());
        for target in [
            "http%3A%2F%2F127.0.0.1%3A8080%2Fmodel.zip",
            "http%3A%2F%2F169.254.169.254%2Flatest%2Fmeta-data",
            "https%3A%2F%2Fcdn.example.com%2Fmodel.zip",
        ] {
            let uri = format!("/api/reconstruction/download-zip?url={}", target);
            let (status, body) = send(&app, get_request(&uri)).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            let value: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(value["error"], "forbidden");
        }
    }

    #[tokio::test]
    async fn test_download_proxy_rechecks_redirect_hosts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let elsewhere = format!("http://localhost:{}/internal/secret.zip", addr.port());
        let upstream = Router::new()
            .route(
                "/files/model.zip",
                get(move || {
                    let target = elsewhere.clone();
                    async move { axum::response::Redirect::temporary(&target) }
                }),
            )
            .route(
                "/internal/secret.zip",
                get(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { b"PK\x03\x04secret".to_vec() }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, upstream).await.unwrap();
        });

        let app = test_app(allow_loopback());
        let uri = format!(
            "/api/reconstruction/download-zip?url=http%3A%2F%2F{}%2Ffiles%2Fmodel.zip",
            addr
        );
        let (status, body) = send(&app, get_request(&uri)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "upstream");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let mut config = allow_loopback();
        config.allowed_hosts.push("localhost".to_string());
        let (status, body) = send(&test_app(config), get_request(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"PK\x03\x04secret");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_download_proxy_streams_archive() {
        let upstream = Router::new().route(
            "/files/model.zip",
            get(|| async { b"PK\x03\x04archive".to_vec() }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, upstream).await.unwrap();
        });

        let app = test_app(allow_loopback());
        let uri = format!(
            "/api/reconstruction/download-zip?url=http%3A%2F%2F{}%2Ffiles%2Fmodel.zip",
            addr
        );
        let response = app.clone().oneshot(get_request(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"model.zip\""
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"PK\x03\x04archive");
    }

    #[tokio::test]
    async fn test_transcription_proxy_requires_upstream() {
        let app = test_app(ProxyConfig::default());
        let boundary = "scanahead";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"voice-note.webm\"\r\nContent-Type: audio/webm\r\n\r\nvoice\r\n--{b}--\r\n",
            b = boundary
        );
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/transcribe")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();

        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "config");
    }

    #[tokio::test]
    async fn test_case_lifecycle() {
        let app = test_app(ProxyConfig::default());
        let patient_id = Uuid::new_v4();

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/v1/cases",
                json!({ "patientId": patient_id, "draft": photo_draft() }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let receipt: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(receipt["image_paths"].as_array().unwrap().len(), 5);
        assert_eq!(receipt["model_state"], "NoJob");
        let appointment_id = receipt["appointment_id"].as_str().unwrap().to_string();
        let submission_id = receipt["submission_id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, get_request(&format!("/api/v1/cases/{}", appointment_id))).await;
        assert_eq!(status, StatusCode::OK);
        let case: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(case["transcription"], "Pending transcription");
        assert_eq!(case["model_state"], "NoJob");

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/v1/submissions/{}/model-status", submission_id),
                json!({}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let model: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(model["state"], "NoJob");

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/v1/submissions/{}/model", submission_id),
                json!({}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["error"], "model_not_ready");

        let (status, _) = send(
            &app,
            json_request(
                "PUT",
                &format!("/api/v1/appointments/{}/status", appointment_id),
                json!({ "status": "reviewing" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            json_request(
                "PUT",
                &format!("/api/v1/submissions/{}/notes", submission_id),
                json!({ "notes": "Reviewed, schedule imaging" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, get_request("/metrics")).await;
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("scanahead_submissions_total{outcome=\"created\"} 1"));
    }

    #[tokio::test]
    async fn test_video_case_without_video_is_rejected() {
        let app = test_app(ProxyConfig::default());
        let mut draft = photo_draft();
        draft.set_capture_mode(CaptureMode::Video);

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/v1/cases",
                json!({ "patientId": Uuid::new_v4(), "draft": draft }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["error"], "validation");
        assert!(error["message"].as_str().unwrap().contains("video"));
    }

    #[tokio::test]
    async fn test_unknown_records() {
        let app = test_app(ProxyConfig::default());
        let missing = Uuid::new_v4();

        let (status, _) = send(&app, get_request(&format!("/api/v1/cases/{}", missing))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            json_request(
                "PUT",
                &format!("/api/v1/appointments/{}/status", missing),
                json!({ "status": "done" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            json_request(
                "PUT",
                &format!("/api/v1/submissions/{}/notes", missing),
                json!({ "notes": "n/a" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
