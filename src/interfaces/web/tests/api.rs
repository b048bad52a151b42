use axum::{
    Json, Router,
    body::Body,
    http::{Method, Request, StatusCode},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower::util::ServiceExt;

use super::{json_request, test_config, test_state};
use crate::core::approval::ApprovalVerdict;
use crate::core::notify::{Notification, NotificationKind, NotificationSink};
use crate::interfaces::web::auth::hash_token;
use crate::core::config::TlsPaths;
use crate::core::lifecycle::LifecycleComponent;
use crate::interfaces::web::{ApiServer, build_api_router};

fn app() -> Router {
    let dir = std::env::temp_dir();
    let (state, _) = test_state(test_config("solo-missing-agent", &dir), ApprovalVerdict::Allow);
    build_api_router(state)
}

/// Ollama and Kokoro stand-ins on one port.
async fn spawn_collaborators() -> String {
    let app = Router::new()
        .route(
            "/api/tags",
            get(|| async { Json(json!({ "models": [{ "name": "llama3.2:latest" }] })) }),
        )
        .route("/health", get(|| async { "ok" }))
        .route(
            "/v1/audio/speech",
            post(|Json(body): Json<Value>| async move {
                body["input"].as_str().unwrap_or_default().as_bytes().to_vec()
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn security_headers_present_on_responses() {
    let req = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    assert_eq!(
        resp.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
    assert!(
        resp.headers()
            .get("content-security-policy")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("default-src 'self'")
    );
}

#[tokio::test]
async fn health_is_degraded_when_collaborators_are_down() {
    let (status, json) = json_request(app(), Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["services"]["app"], "healthy");
    assert_eq!(json["services"]["ollama"], "unreachable");
    assert_eq!(json["services"]["kokoro"], "unreachable");
    assert_eq!(json["services"]["policy"], "disabled");
}

#[tokio::test]
async fn health_is_healthy_when_collaborators_answer() {
    let url = spawn_collaborators().await;
    let dir = std::env::temp_dir();
    let mut config = test_config("solo-missing-agent", &dir);
    config.chat.ollama_url = url.clone();
    config.tts.kokoro_url = url;
    let (state, _) = test_state(config, ApprovalVerdict::Allow);

    let (_, json) = json_request(build_api_router(state), Method::GET, "/api/health", None).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["services"]["ollama"], "healthy");
    assert_eq!(json["services"]["kokoro"], "healthy");
}

#[tokio::test]
async fn tts_returns_base64_audio() {
    let url = spawn_collaborators().await;
    let dir = std::env::temp_dir();
    let mut config = test_config("solo-missing-agent", &dir);
    config.tts.kokoro_url = url;
    let (state, _) = test_state(config, ApprovalVerdict::Allow);

    let (status, json) = json_request(
        build_api_router(state),
        Method::POST,
        "/api/tts",
        Some(json!({ "text": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["format"], "mp3");
    assert_eq!(json["audio_data"], "aGk=");
}

#[tokio::test]
async fn empty_chat_and_tts_inputs_are_bad_requests() {
    let (status, json) = json_request(
        app(),
        Method::POST,
        "/api/chat",
        Some(json!({ "message": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No message provided");

    let (status, _) = json_request(
        app(),
        Method::POST,
        "/api/chat/stream",
        Some(json!({ "history": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) =
        json_request(app(), Method::POST, "/api/tts", Some(json!({ "text": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No text provided");
}

#[tokio::test]
async fn unreachable_ollama_is_a_server_error() {
    let (status, json) = json_request(
        app(),
        Method::POST,
        "/api/chat",
        Some(json!({ "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);

    let (status, json) = json_request(app(), Method::GET, "/api/models", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Failed to fetch models");
}

#[tokio::test]
async fn notifications_are_listed_newest_first_with_limit() {
    let dir = std::env::temp_dir();
    let (state, notifier) =
        test_state(test_config("solo-missing-agent", &dir), ApprovalVerdict::Allow);
    for i in 0..3 {
        notifier
            .notify(Notification::new(
                NotificationKind::Success,
                &format!("job-{}", i),
                "Task completed",
                "done",
            ))
            .await;
    }

    let (status, json) = json_request(
        build_api_router(state),
        Method::GET,
        "/api/notifications?limit=2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let items = json["notifications"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["task_id"], "job-2");
}

#[tokio::test]
async fn root_serves_the_embedded_page() {
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let resp = app().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
}

#[tokio::test]
async fn token_protects_api_but_not_health() {
    let dir = std::env::temp_dir();
    let mut config = test_config("solo-missing-agent", &dir);
    config.server.token_hashes = vec![hash_token("secret")];
    let (state, _) = test_state(config, ApprovalVerdict::Allow);
    let app = build_api_router(state);

    let (status, _) = json_request(app.clone(), Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = json_request(app.clone(), Method::GET, "/api/tasks", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/tasks")
        .header("authorization", "Bearer secret")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn api_route_contract_has_all_expected_paths() {
    let paths = [
        "/api/health",
        "/api/tasks",
        "/api/tasks/job-1",
        "/api/tasks/job-1/approve",
        "/api/tasks/stream",
        "/api/tasks/stream/approve",
        "/api/tasks/stream/sessions",
        "/api/chat",
        "/api/chat/stream",
        "/api/tts",
        "/api/voices",
        "/api/models",
        "/api/notifications",
        "/api/logs",
    ];

    let app = app();
    for path in paths {
        let req = Request::builder()
            .method(Method::PUT)
            .uri(path)
            .body(Body::empty())
            .expect("request should build");
        let resp = app
            .clone()
            .oneshot(req)
            .await
            .expect("router oneshot should succeed");
        assert_eq!(
            resp.status(),
            StatusCode::METHOD_NOT_ALLOWED,
            "Route missing from router: {}",
            path
        );
    }
}

#[tokio::test]
async fn server_with_unreadable_certificate_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&cert, "not a certificate").unwrap();
    std::fs::write(&key, "not a key").unwrap();
    let (state, _) = test_state(
        test_config("solo-missing-agent", dir.path()),
        ApprovalVerdict::Allow,
    );

    let plain = ApiServer::new(state.clone());
    assert_eq!(plain.scheme(), "http");

    let mut server = ApiServer::new(state).with_tls(Some(TlsPaths { cert, key }));
    assert_eq!(server.scheme(), "https");
    let err = server.on_start().await.unwrap_err();
    assert!(
        format!("{:#}", err).contains("failed to load TLS certificate"),
        "{:#}",
        err
    );
    assert!(server.local_addr().is_none());
}
