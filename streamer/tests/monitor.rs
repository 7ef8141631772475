//! Activity monitor and circuit-breaker tests, driven by paused time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeLauncher;
use streamer::encoder::OutputFormat;
use streamer::session::{
    ActivityMonitor, AllClients, CastReceivers, Client, FlagPolicy, FlagScope, SessionRegistry,
};
use streamer::storage::StorageLayout;
use streamer::supervisor::ProcessSupervisor;
use tokio::time::advance;

const TIMEOUT: Duration = Duration::from_secs(20);
const COOLDOWN: Duration = Duration::from_secs(180);

struct Fixture {
    _dir: tempfile::TempDir,
    launcher: Arc<FakeLauncher>,
    registry: Arc<SessionRegistry>,
    supervisor: Arc<ProcessSupervisor>,
    monitor: ActivityMonitor,
}

fn fixture(policy: FlagPolicy) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());
    let launcher = Arc::new(FakeLauncher::new());
    let registry = Arc::new(SessionRegistry::new(policy));
    let supervisor = Arc::new(ProcessSupervisor::new(
        layout,
        launcher.clone(),
        Arc::clone(&registry),
        OutputFormat::Dash,
    ));
    let monitor = ActivityMonitor::new(
        Arc::clone(&registry),
        Arc::clone(&supervisor),
        TIMEOUT,
        Duration::from_secs(5),
    );
    Fixture {
        _dir: dir,
        launcher,
        registry,
        supervisor,
        monitor,
    }
}

fn default_policy() -> FlagPolicy {
    FlagPolicy::new(
        FlagScope::Client,
        Arc::new(CastReceivers::default()),
        COOLDOWN,
    )
}

fn chromecast() -> Client {
    Client::new(
        "192.168.1.50",
        Some("Mozilla/5.0 (X11; Linux aarch64) CrKey/1.56.500000"),
    )
}

fn player() -> Client {
    Client::new("192.168.1.20", Some("VLC/3.0.20 LibVLC/3.0.20"))
}

/// Manifest request as the HTTP layer performs it.
async fn request_manifest(f: &Fixture, channel: &str, client: &Client) -> Option<u64> {
    if f.registry.is_flagged(channel, client) {
        return None;
    }
    let info = f.supervisor.ensure_running(channel).await.unwrap();
    f.registry.record_manifest_request(channel, client);
    Some(info.generation)
}

#[tokio::test(start_paused = true)]
async fn test_idle_player_is_torn_down_without_flag() {
    let f = fixture(default_policy());

    // t=0 manifest, t=5 segment.
    let first = request_manifest(&f, "42", &player()).await.unwrap();
    advance(Duration::from_secs(5)).await;
    assert!(f.registry.record_segment_fetch("42", &player(), "chunk-0-00001.m4s"));

    // t=30 sweep: idle for 25s.
    advance(Duration::from_secs(25)).await;
    let report = f.monitor.sweep().await;
    assert_eq!(report.expired_viewers, 1);
    assert_eq!(report.flagged, 0);
    assert_eq!(report.torn_down, vec!["42"]);
    assert_eq!(f.launcher.kills(), 1);
    assert!(f.supervisor.encoder_info("42").await.is_none());

    // t=31 manifest: fresh launch.
    advance(Duration::from_secs(1)).await;
    let second = request_manifest(&f, "42", &player()).await.unwrap();
    assert!(second > first);
    assert_eq!(f.launcher.launches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_active_viewer_keeps_encoder_alive() {
    let f = fixture(default_policy());
    request_manifest(&f, "42", &player()).await.unwrap();

    for n in 0..12 {
        advance(Duration::from_secs(5)).await;
        f.registry
            .record_segment_fetch("42", &player(), &format!("chunk-0-{n:05}.m4s"));
        let report = f.monitor.sweep().await;
        assert!(report.torn_down.is_empty());
    }
    assert_eq!(f.launcher.launches(), 1);
    assert_eq!(f.launcher.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_relaunch_after_crash_survives_next_sweep() {
    let f = fixture(default_policy());

    // t=0 manifest, t=5 segment, t=6 encoder dies.
    request_manifest(&f, "42", &player()).await.unwrap();
    advance(Duration::from_secs(5)).await;
    f.registry
        .record_segment_fetch("42", &player(), "chunk-0-00001.m4s");
    advance(Duration::from_secs(1)).await;
    f.launcher.crash_all();

    // t=23 manifest relaunches; the old history is 18s behind.
    advance(Duration::from_secs(17)).await;
    assert_eq!(request_manifest(&f, "42", &player()).await, Some(2));
    assert_eq!(f.launcher.launches(), 2);

    // t=26 sweep: the fresh encoder has been up for 3s only.
    advance(Duration::from_secs(3)).await;
    let report = f.monitor.sweep().await;
    assert!(report.torn_down.is_empty());
    assert_eq!(report.expired_viewers, 0);
    assert_eq!(f.supervisor.encoder_info("42").await.unwrap().generation, 2);
    assert_eq!(f.registry.viewer_count("42"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_viewer_leaving_does_not_stop_channel() {
    let f = fixture(default_policy());
    let other = Client::new("192.168.1.21", Some("VLC/3.0.20 LibVLC/3.0.20"));
    request_manifest(&f, "42", &player()).await.unwrap();
    request_manifest(&f, "42", &other).await.unwrap();

    for _ in 0..6 {
        advance(Duration::from_secs(5)).await;
        f.registry.record_segment_fetch("42", &other, "a.ts");
    }
    let report = f.monitor.sweep().await;
    assert_eq!(report.expired_viewers, 1);
    assert!(report.torn_down.is_empty());
    assert_eq!(f.registry.viewer_count("42"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cast_receiver_flagged_until_cooldown_expires() {
    let f = fixture(default_policy());
    request_manifest(&f, "42", &chromecast()).await.unwrap();

    advance(TIMEOUT + Duration::from_secs(1)).await;
    let report = f.monitor.sweep().await;
    assert_eq!(report.flagged, 1);
    assert_eq!(report.torn_down, vec!["42"]);

    // Rejected for the whole cooldown, without relaunching.
    assert!(request_manifest(&f, "42", &chromecast()).await.is_none());
    advance(COOLDOWN - Duration::from_secs(1)).await;
    assert!(request_manifest(&f, "42", &chromecast()).await.is_none());
    assert_eq!(f.launcher.launches(), 1);

    // Other clients are unaffected under client scope.
    assert!(request_manifest(&f, "42", &player()).await.is_some());
    f.supervisor.teardown("42").await;

    advance(Duration::from_secs(1)).await;
    assert!(request_manifest(&f, "42", &chromecast()).await.is_some());
    assert_eq!(f.registry.active_flags(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_channel_scope_rejects_every_client() {
    let f = fixture(FlagPolicy::new(
        FlagScope::Channel,
        Arc::new(AllClients),
        COOLDOWN,
    ));
    request_manifest(&f, "42", &player()).await.unwrap();

    advance(TIMEOUT + Duration::from_secs(1)).await;
    f.monitor.sweep().await;

    assert!(request_manifest(&f, "42", &chromecast()).await.is_none());
    assert!(request_manifest(&f, "7", &chromecast()).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_background_task_sweeps_until_cancelled() {
    let f = fixture(default_policy());
    request_manifest(&f, "42", &player()).await.unwrap();

    let supervisor = Arc::clone(&f.supervisor);
    let monitor = Arc::new(f.monitor);
    let cancel = tokio_util::sync::CancellationToken::new();
    let task = monitor.start_background_task(cancel.clone());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(supervisor.encoder_info("42").await.is_none());

    cancel.cancel();
    task.await.unwrap();
}
