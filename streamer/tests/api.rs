//! HTTP surface tests through the full router.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use serde_json::Value;
use tower::ServiceExt;

use common::{FakeLauncher, FakeVolume};
use streamer::api::{AppState, build_router};
use streamer::app::StreamerService;
use streamer::config::StreamerConfig;
use streamer::encoder::OutputFormat;
use streamer::session::{Client, FlagFilterKind};

const UA: &str = "test-agent/1.0";

struct Harness {
    _dir: tempfile::TempDir,
    service: Arc<StreamerService>,
    launcher: Arc<FakeLauncher>,
    router: Router,
}

fn harness(launcher: FakeLauncher, configure: impl FnOnce(&mut StreamerConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StreamerConfig::default();
    config.storage.scratch_root = dir.path().join("stream");
    configure(&mut config);

    let launcher = Arc::new(launcher);
    let probe = Arc::new(FakeVolume::new(dir.path(), u64::MAX));
    let service = Arc::new(StreamerService::with_parts(config, launcher.clone(), probe));
    let router = build_router(AppState::new(Arc::clone(&service)));

    Harness {
        _dir: dir,
        service,
        launcher,
        router,
    }
}

impl Harness {
    async fn request(&self, method: Method, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::USER_AGENT, UA)
            .body(Body::empty())
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.request(Method::GET, uri).await
    }
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

fn content_type(response: &Response) -> &str {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_dash_manifest_served_once_ready() {
    let h = harness(FakeLauncher::new().with_output("manifest.mpd", 600), |_| {});

    let response = h.get("/stream/42/manifest.mpd").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "application/dash+xml");
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );
    assert_eq!(body_text(response).await.len(), 600);

    // Second request reuses the encoder.
    let response = h.get("/stream/42/manifest.mpd").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.launcher.launches(), 1);

    let session = h
        .service
        .registry
        .session("42", &Client::new("unknown", Some(UA)))
        .unwrap();
    assert_eq!(session.segments_served, 0);
}

#[tokio::test]
async fn test_hls_entry_not_served_in_dash_mode() {
    let h = harness(FakeLauncher::new(), |_| {});

    let response = h.get("/stream/42/index.m3u8").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.launcher.launches(), 0);
}

#[tokio::test]
async fn test_hls_master_playlist_lists_profiles() {
    let launcher = FakeLauncher::new()
        .with_output("hq.m3u8", 600)
        .with_output("lq.m3u8", 600);
    let h = harness(launcher, |config| {
        config.encoder.output_format = OutputFormat::Hls;
    });

    let response = h.get("/stream/42/index.m3u8").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "application/vnd.apple.mpegurl");

    let body = body_text(response).await;
    assert!(body.starts_with("#EXTM3U"));
    assert_eq!(body.matches("#EXT-X-STREAM-INF").count(), 2);
    assert!(body.contains("\nhq.m3u8\n"));
    assert!(body.contains("\nlq.m3u8\n"));
}

#[tokio::test]
async fn test_manifest_not_ready_is_retryable() {
    let h = harness(FakeLauncher::new().with_output("manifest.mpd", 100), |config| {
        config.readiness.max_wait_secs = 1;
    });

    let response = h.get("/stream/42/manifest.mpd").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    assert_eq!(body_json(response).await["code"], "NOT_READY");
}

#[tokio::test]
async fn test_launch_failure_is_unavailable() {
    let h = harness(FakeLauncher::new(), |_| {});
    h.launcher.set_failing(true);

    let response = h.get("/stream/42/manifest.mpd").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "ENCODER_UNAVAILABLE");
}

#[tokio::test]
async fn test_flagged_client_gets_gone() {
    let h = harness(FakeLauncher::new().with_output("manifest.mpd", 600), |config| {
        config.session.inactivity_timeout_secs = 1;
        config.session.flag_filter = FlagFilterKind::AllClients;
    });

    assert_eq!(h.get("/stream/42/manifest.mpd").await.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let report = h.service.monitor.sweep().await;
    assert_eq!(report.flagged, 1);

    let response = h.get("/stream/42/manifest.mpd").await;
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(body_json(response).await["code"], "STREAM_ENDED");
    assert_eq!(h.launcher.launches(), 1);
}

#[tokio::test]
async fn test_segment_served_and_counted() {
    let h = harness(FakeLauncher::new(), |_| {});
    let dir = h.service.layout.channel_dir("42");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(dir.join("chunk-0-00001.m4s"), b"fragment").await.unwrap();

    let response = h.get("/stream/42/chunk-0-00001.m4s").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "video/iso.segment");
    assert_eq!(body_text(response).await, "fragment");

    let session = h
        .service
        .registry
        .session("42", &Client::new("unknown", Some(UA)))
        .unwrap();
    assert_eq!(session.segments_served, 1);
}

#[tokio::test]
async fn test_missing_segment_is_not_found() {
    let h = harness(FakeLauncher::new(), |_| {});

    let response = h.get("/stream/42/chunk-0-00009.m4s").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.service.registry.total_viewers(), 0);
}

#[tokio::test]
async fn test_traversal_rejected() {
    let h = harness(FakeLauncher::new(), |_| {});

    let response = h.get("/stream/42/%2E%2E").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h.get("/stream/%2E%2E/manifest.mpd").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.launcher.launches(), 0);
}

#[tokio::test]
async fn test_health_reports_counts() {
    let h = harness(FakeLauncher::new().with_output("manifest.mpd", 600), |_| {});
    h.get("/stream/42/manifest.mpd").await;

    let response = h.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["live_channels"], 1);
    assert_eq!(json["viewers"], 1);
    assert_eq!(json["active_flags"], 0);
}

#[tokio::test]
async fn test_channel_listing_and_teardown() {
    let h = harness(FakeLauncher::new().with_output("manifest.mpd", 600), |_| {});
    h.get("/stream/42/manifest.mpd").await;

    let json = body_json(h.get("/api/channels").await).await;
    let channels = json.as_array().unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0]["channel"], "42");
    assert_eq!(channels[0]["viewers"], 1);
    assert_eq!(channels[0]["encoder"]["generation"], 1);

    let response = h.request(Method::DELETE, "/api/channels/42").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["stopped"], true);
    assert_eq!(h.launcher.kills(), 1);

    let json = body_json(h.get("/api/channels").await).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_refuses_new_encoders() {
    let h = harness(FakeLauncher::new(), |_| {});
    h.service.shutdown_with_timeout(Duration::from_secs(1)).await;

    let err = h.service.supervisor.ensure_running("42").await.unwrap_err();
    assert!(matches!(err, streamer::Error::Cancelled));
    assert_eq!(h.launcher.launches(), 0);
}
