//! End-to-end trigger tests.
//!
//! Drives the trigger router against stub platform and metrics servers:
//! a request runs one full tick (discovery → diagnosis → rewrite → commit)
//! and the stubs capture what the daemon committed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tower::ServiceExt;

use rollgate_config::{
    Config, Criterion, MetricsConfig, NotificationConfig, Platform, Strategy, Target,
};
use rollgate_platform::{Service, TrafficTarget};
use rollgated::{server, AppState};

type Replaced = Arc<Mutex<Vec<Service>>>;

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A service mid-fleet: stable at 100%, a new revision ready to roll out.
fn managed_service() -> Service {
    let mut svc = Service::default();
    svc.metadata.name = "hello".into();
    svc.metadata
        .labels
        .insert("rollout".into(), "gradual".into());
    svc.spec.traffic = vec![
        TrafficTarget::new("hello-001", 100, "stable"),
        TrafficTarget::latest("latest"),
    ];
    svc.status.traffic = svc.spec.traffic.clone();
    svc.status.latest_ready_revision_name = "hello-002".into();
    svc.status.url = "https://hello.example.app".into();
    svc
}

/// Serving API stub: lists one managed service, records replacements.
async fn platform_stub(replaced: Replaced) -> SocketAddr {
    let router = Router::new()
        .route(
            "/apis/serving.knative.dev/v1/namespaces/{ns}/services",
            get(|| async { Json(serde_json::json!({"items": [managed_service()]})) }),
        )
        .route(
            "/apis/serving.knative.dev/v1/namespaces/{ns}/services/{id}",
            put(
                |State(replaced): State<Replaced>,
                 Path((_, _)): Path<(String, String)>,
                 Json(svc): Json<Service>| async move {
                    replaced.lock().unwrap().push(svc.clone());
                    Json(svc)
                },
            ),
        )
        .with_state(replaced);
    spawn(router).await
}

/// Sheet stub with a healthy row for (us-east1, hello).
async fn sheet_stub() -> SocketAddr {
    let router = Router::new().route(
        "/v4/spreadsheets/{id}/values/{range}",
        get(|| async {
            Json(serde_json::json!({
                "values": [
                    ["us-east1", "hello", "1000", "0.01", "500", "400", "300"]
                ]
            }))
        }),
    );
    spawn(router).await
}

fn config(platform_addr: SocketAddr, sheet_addr: SocketAddr) -> Config {
    Config {
        targets: vec![Target {
            project: "my-project".into(),
            regions: vec!["us-east1".into()],
            label_selector: "rollout=gradual".into(),
            platform: Platform::Hosted,
            cluster: None,
            endpoint: Some(format!("http://{platform_addr}")),
            auth_token: None,
        }],
        strategies: vec![Strategy {
            steps: vec![5, 30, 60],
            interval: 60,
            health_offset: Some(600),
            criteria: vec![
                Criterion::RequestLatency {
                    percentile: 99.0,
                    threshold: 750.0,
                },
                Criterion::ErrorRate { threshold: 5.0 },
            ],
        }],
        metrics: MetricsConfig::Sheet {
            sheet_id: "sheet-1".into(),
            sheet_name: None,
            endpoint: Some(format!("http://{sheet_addr}")),
            auth_token: None,
        },
        notification: None,
    }
}

#[tokio::test]
async fn a_trigger_request_runs_a_full_tick() {
    let replaced: Replaced = Arc::default();
    let platform_addr = platform_stub(replaced.clone()).await;
    let sheet_addr = sheet_stub().await;

    let config = config(platform_addr, sheet_addr);
    config.validate().unwrap();
    let state = AppState::from_config(config).unwrap();
    let router = server::build_router(state);

    let response = router
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The new revision got its first step committed back to the platform.
    let committed = replaced.lock().unwrap();
    assert_eq!(committed.len(), 1);
    let traffic = &committed[0].spec.traffic;
    assert_eq!(traffic[0].revision_name, "hello-001");
    assert_eq!(traffic[0].percent, 95);
    assert_eq!(traffic[0].tag, "stable");
    assert_eq!(traffic[1].revision_name, "hello-002");
    assert_eq!(traffic[1].percent, 5);
    assert_eq!(traffic[1].tag, "candidate");
    assert_eq!(
        committed[0].annotation("rollgate.dev/candidateRevision"),
        Some("hello-002")
    );
}

#[tokio::test]
async fn rollout_events_reach_the_webhook() {
    let replaced: Replaced = Arc::default();
    let platform_addr = platform_stub(replaced.clone()).await;
    let sheet_addr = sheet_stub().await;

    let events = Arc::new(AtomicU32::new(0));
    let webhook = Router::new()
        .route(
            "/hooks",
            post(
                |State(events): State<Arc<AtomicU32>>,
                 Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(body["event"], "rollout");
                    assert_eq!(body["candidateRevisionName"], "hello-002");
                    assert_eq!(body["candidateRevisionPercent"], 5);
                    events.fetch_add(1, Ordering::SeqCst);
                },
            ),
        )
        .with_state(events.clone());
    let webhook_addr = spawn(webhook).await;

    let mut config = config(platform_addr, sheet_addr);
    config.notification = Some(NotificationConfig {
        webhook_url: format!("http://{webhook_addr}/hooks"),
    });
    let state = AppState::from_config(config).unwrap();
    let router = server::build_router(state);

    let response = router
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_target_returns_a_numbered_error_summary() {
    let sheet_addr = sheet_stub().await;
    // Nothing listens on port 9: discovery for the target fails.
    let config = config("127.0.0.1:9".parse().unwrap(), sheet_addr);
    let state = AppState::from_config(config).unwrap();
    let router = server::build_router(state);

    let response = router
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(
        body.starts_with("there were 1 errors: \n[error#0]"),
        "unexpected body: {body}"
    );
}

#[tokio::test]
async fn unhealthy_metrics_roll_the_candidate_back() {
    let replaced: Replaced = Arc::default();

    // The candidate is already mid-rollout at 30%.
    let mut svc = managed_service();
    svc.spec.traffic = vec![
        TrafficTarget::new("hello-001", 70, "stable"),
        TrafficTarget::new("hello-002", 30, "candidate"),
        TrafficTarget::latest("latest"),
    ];
    svc.status.traffic = svc.spec.traffic.clone();

    let platform = Router::new()
        .route(
            "/apis/serving.knative.dev/v1/namespaces/{ns}/services",
            get(move || {
                let svc = svc.clone();
                async move { Json(serde_json::json!({"items": [svc]})) }
            }),
        )
        .route(
            "/apis/serving.knative.dev/v1/namespaces/{ns}/services/{id}",
            put(
                |State(replaced): State<Replaced>, Json(svc): Json<Service>| async move {
                    replaced.lock().unwrap().push(svc.clone());
                    Json(svc)
                },
            ),
        )
        .with_state(replaced.clone());
    let platform_addr = spawn(platform).await;

    // Latency p99 of 2000ms blows the 750ms criterion.
    let sheet = Router::new().route(
        "/v4/spreadsheets/{id}/values/{range}",
        get(|| async {
            Json(serde_json::json!({
                "values": [
                    ["us-east1", "hello", "1000", "0.01", "2000", "1500", "900"]
                ]
            }))
        }),
    );
    let sheet_addr = spawn(sheet).await;

    let state = AppState::from_config(config(platform_addr, sheet_addr)).unwrap();
    let router = server::build_router(state);

    let response = router
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let committed = replaced.lock().unwrap();
    assert_eq!(committed.len(), 1);
    let traffic = &committed[0].spec.traffic;
    assert_eq!(traffic[0].revision_name, "hello-001");
    assert_eq!(traffic[0].percent, 100);
    assert_eq!(traffic[0].tag, "stable");
    assert!(traffic.iter().all(|t| t.tag != "candidate"));
    assert_eq!(
        committed[0].annotation("rollgate.dev/lastFailedCandidateRevision"),
        Some("hello-002")
    );
}
