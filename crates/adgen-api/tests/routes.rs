//! Router tests against in-process engine collaborators.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use adgen_api::{create_router, ApiConfig, AppState};
use adgen_engine::testing::{FakeAssembler, FakeRender, FakeVision};
use adgen_engine::{AnalysisCache, Collaborators, EngineConfig, Orchestrator};
use adgen_store::GenerationStore;

struct TestApp {
    _dir: tempfile::TempDir,
    router: Router,
    engine: Orchestrator,
    vision: Arc<FakeVision>,
}

fn app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let engine_config = EngineConfig {
        retry_base_delay: Duration::ZERO,
        retry_max_delay: Duration::ZERO,
        verify_clip_duration: false,
        clips_dir: dir.path().join("clips"),
        output_dir: dir.path().join("outputs"),
        ..EngineConfig::default()
    };
    let vision = Arc::new(FakeVision::new());
    let engine = Orchestrator::new(
        engine_config,
        Arc::new(GenerationStore::in_memory()),
        Arc::new(AnalysisCache::in_memory()),
        Collaborators {
            render: Arc::new(FakeRender::new()),
            vision: vision.clone(),
            assembler: Arc::new(FakeAssembler::new()),
        },
    );
    let config = ApiConfig {
        upload_dir: dir.path().join("uploads"),
        ..ApiConfig::default()
    };
    let router = create_router(AppState::new(config, engine.clone()), None);
    TestApp {
        _dir: dir,
        router,
        engine,
        vision,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn upload(bytes: &'static [u8], content_type: &str) -> Request<Body> {
    Request::post("/api/analyze-product")
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

/// Analyze a product image and approve the script unchanged.
async fn create(app: &TestApp) -> Value {
    let (status, analyzed) = send(&app.router, upload(b"\x89PNG product", "image/png")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, view) = send(
        &app.router,
        post_json(
            "/api/generations",
            json!({ "script": analyzed["script"], "image_ref": analyzed["image_ref"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    view
}

#[tokio::test]
async fn test_health_and_ready() {
    let app = app();
    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app.router, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store_backend"], "memory");
    assert_eq!(body["generations"], 0);
}

#[tokio::test]
async fn test_analyze_product_caches_by_content() {
    let app = app();
    let (status, first) = send(&app.router, upload(b"\x89PNG lamp", "image/png")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["cached"], false);
    assert_eq!(first["script"]["scenes"].as_array().unwrap().len(), 12);
    assert!(first["image_ref"].as_str().unwrap().ends_with(".png"));

    let (status, second) = send(&app.router, upload(b"\x89PNG lamp", "image/png")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["cached"], true);
    assert_eq!(second["image_ref"], first["image_ref"]);
    assert_eq!(second["script"], first["script"]);
    assert_eq!(app.vision.calls(), 1);
}

#[tokio::test]
async fn test_analyze_product_rejects_bad_uploads() {
    let app = app();
    let (status, body) = send(&app.router, upload(b"hello", "text/plain")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("unsupported image type"));

    let (status, _) = send(&app.router, upload(b"", "image/png")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.vision.calls(), 0);
}

#[tokio::test]
async fn test_create_generation_and_poll_status() {
    let app = app();
    let view = create(&app).await;
    assert_eq!(view["status"], "pending");
    let clips = view["clips"].as_array().unwrap();
    assert_eq!(clips.len(), 12);
    assert_eq!(clips[0]["sequence_index"], 0);
    assert_eq!(clips[11]["sequence_index"], 11);
    assert!(view.get("final_video_url").is_none());

    let id = view["id"].as_str().unwrap();
    let (status, polled) = send(&app.router, get(&format!("/api/generations/{}/status", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(polled["id"], view["id"]);

    app.engine.poll_once().await;
    let (_, polled) = send(&app.router, get(&format!("/api/generations/{}/status", id))).await;
    assert_eq!(polled["status"], "generating");
}

#[tokio::test]
async fn test_unknown_generation_is_404() {
    let app = app();
    let (status, body) = send(&app.router, get("/api/generations/nope/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].is_string());

    let (status, _) = send(&app.router, post_json("/api/generations/nope/cancel", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sequence_gap_is_rejected() {
    let app = app();
    let (_, analyzed) = send(&app.router, upload(b"\x89PNG mug", "image/png")).await;
    let mut script = analyzed["script"].clone();
    script["scenes"].as_array_mut().unwrap().remove(3);

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/generations",
            json!({ "script": script, "image_ref": analyzed["image_ref"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("missing"));
    assert_eq!(app.engine.store().len().await, 0);
}

#[tokio::test]
async fn test_unknown_image_ref_is_rejected() {
    let app = app();
    let script = FakeVision::script("Mug");
    for image_ref in ["../secret.png", "never-uploaded.png"] {
        let (status, _) = send(
            &app.router,
            post_json(
                "/api/generations",
                json!({ "script": script, "image_ref": image_ref }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", image_ref);
    }
    assert_eq!(app.engine.store().len().await, 0);
}

#[tokio::test]
async fn test_cancel_generation() {
    let app = app();
    let view = create(&app).await;
    let id = view["id"].as_str().unwrap();

    let (status, cancelled) = send(
        &app.router,
        post_json(&format!("/api/generations/{}/cancel", id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "failed");

    // Nothing left to drive
    assert_eq!(app.engine.poll_once().await, 0);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/health")
                .header("X-Request-ID", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["X-Request-ID"], "req-123");
    assert_eq!(response.headers()["X-Content-Type-Options"], "nosniff");
}
