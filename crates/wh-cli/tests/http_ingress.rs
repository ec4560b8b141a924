//! Integration tests for the daemon's HTTP ingress.
//!
//! Each test starts a daemon on an ephemeral port against a temporary
//! database and drives it over HTTP.

use serde_json::{Value, json};
use tempfile::TempDir;
use wh_cli::api::SubmitStatus;
use wh_cli::client::DaemonClient;
use wh_cli::daemon::{self, RunningDaemon};
use wh_cli::{Config, ProducersConfig};
use wh_core::{ActivityStore, ActivitySubmission, SessionId, SessionState, UserId, WorkBlockState};
use wh_db::Database;

fn test_config(temp: &TempDir) -> Config {
    Config {
        database_path: temp.path().join("wh.db"),
        listen_addr: "127.0.0.1:0".to_string(),
        shutdown_grace_secs: 5,
        producers: ProducersConfig {
            process_watcher: false,
            ..ProducersConfig::default()
        },
        ..Config::default()
    }
}

async fn start(config: &Config) -> (RunningDaemon, DaemonClient, String) {
    let daemon = daemon::start(config).await.unwrap();
    let base = format!("http://{}", daemon.local_addr());
    let client = DaemonClient::new(base.clone()).unwrap();
    (daemon, client, base)
}

fn submission(project: &str) -> ActivitySubmission {
    ActivitySubmission {
        project_name: project.to_string(),
        project_path: format!("/src/{project}"),
        activity_type: "edit".to_string(),
        ..ActivitySubmission::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submissions_open_one_session_with_a_block_per_project() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let (daemon, client, _) = start(&config).await;

    let first = client.submit(&submission("api")).await.unwrap();
    assert_eq!(first.status, SubmitStatus::Recorded);
    let session_id = first.session_id.unwrap();

    // Same project and source inside the quiescence window.
    let repeat = client.submit(&submission("api")).await.unwrap();
    assert_eq!(repeat.status, SubmitStatus::Suppressed);

    let other = client.submit(&submission("web")).await.unwrap();
    assert_eq!(other.status, SubmitStatus::Recorded);
    assert_eq!(other.session_id.as_ref(), Some(&session_id));
    assert_ne!(other.work_block_id, first.work_block_id);

    let health = client.health().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.active_sessions, 1);
    assert_eq!(health.active_work_blocks, 2);
    assert_eq!(health.correlator.received, 3);
    assert_eq!(health.correlator.suppressed, 1);

    let active = client.active_sessions().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].activity_count, 2);

    let pending = client.pending_sessions().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].project_name.ends_with("(+1 others)"));
    assert_eq!(pending[0].active_work_blocks, 2);

    let blocks = client.work_blocks(session_id.as_str()).await.unwrap();
    assert_eq!(blocks.len(), 2);
    assert!(blocks.iter().all(|b| b.state == WorkBlockState::Active));

    daemon.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_submissions_are_rejected() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let (daemon, _, base) = start(&config).await;
    let http = reqwest::Client::new();

    let blank = http
        .post(format!("{base}/activity"))
        .json(&json!({ "project_name": "  ", "activity_type": "edit" }))
        .send()
        .await
        .unwrap();
    assert_eq!(blank.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = blank.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_SUBMISSION");

    let bad_source = http
        .post(format!("{base}/activity"))
        .json(&json!({
            "project_name": "api",
            "activity_type": "edit",
            "activity_source": "carrier_pigeon",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_source.status(), reqwest::StatusCode::BAD_REQUEST);

    let future = http
        .post(format!("{base}/activity"))
        .json(&json!({
            "project_name": "api",
            "activity_type": "edit",
            "timestamp": "2999-01-01T00:00:00Z",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(future.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);

    let inverted = http
        .get(format!("{base}/reports/summary?start=2025-06-02&end=2025-06-01"))
        .send()
        .await
        .unwrap();
    assert_eq!(inverted.status(), reqwest::StatusCode::BAD_REQUEST);

    daemon.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_all_closes_live_state() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let (daemon, client, base) = start(&config).await;

    let recorded = client.submit(&submission("api")).await.unwrap();
    let session_id = recorded.session_id.unwrap();

    let closed = client.close_all().await.unwrap();
    assert_eq!(closed.live.sessions_closed, 1);
    assert_eq!(closed.live.work_blocks_closed, 1);
    assert_eq!(closed.stored.sessions_closed, 0);

    assert!(client.active_sessions().await.unwrap().is_empty());
    let blocks = client.work_blocks(session_id.as_str()).await.unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].state, WorkBlockState::ClosedByCleanup);
    assert!(blocks[0].end_time.is_some());

    let today = chrono::Utc::now().date_naive();
    let summary: Value = reqwest::get(format!("{base}/reports/summary?start={today}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["work_block_count"], 1);
    assert_eq!(summary["projects"][0]["project_name"], "api");

    daemon.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_all_racing_a_submission_keeps_storage_in_step() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let (daemon, client, _) = start(&config).await;
    let user = UserId::new("default_user").unwrap();

    let first = client.submit(&submission("api")).await.unwrap();
    let anchor = first.session_id.unwrap();

    for project in ["web", "cli", "docs", "infra"] {
        let sub = submission(project);
        let (closed, submitted) = tokio::join!(client.close_all(), client.submit(&sub));
        closed.unwrap();
        submitted.unwrap();

        // Queries queue behind every earlier write.
        client.work_blocks(anchor.as_str()).await.unwrap();

        let live: Vec<SessionId> = client
            .active_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        let stored: Vec<SessionId> = Database::open(&config.database_path)
            .unwrap()
            .load_active_sessions(&user)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(stored, live, "after racing {project}");
    }

    daemon.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_restores_session_and_finalizes_blocks() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);

    let (daemon, client, _) = start(&config).await;
    let recorded = client.submit(&submission("api")).await.unwrap();
    let session_id = recorded.session_id.unwrap();
    daemon.shutdown().await.unwrap();

    let (daemon, client, _) = start(&config).await;
    let active = client.active_sessions().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, session_id);
    assert_eq!(active[0].state, SessionState::Active);

    // The block left open by the previous run is finalized at startup.
    let blocks = client.work_blocks(session_id.as_str()).await.unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].state, WorkBlockState::Idle);

    // New activity joins the restored session with a fresh block.
    let next = client.submit(&submission("api")).await.unwrap();
    assert_eq!(next.status, SubmitStatus::Recorded);
    assert_eq!(next.session_id.as_ref(), Some(&session_id));
    assert_ne!(next.work_block_id, recorded.work_block_id);

    daemon.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_daemon_on_same_database_is_refused() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let (daemon, _, _) = start(&config).await;

    let second = daemon::start(&config).await;
    assert!(second.is_err());

    daemon.shutdown().await.unwrap();
}
