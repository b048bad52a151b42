use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{chat, health, notifications, stream, tasks, tts};

fn build_localhost_cors(port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
        format!("https://127.0.0.1:{}", port),
        format!("https://localhost:{}", port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    // Health and the page itself stay reachable without a token
    let public_routes = Router::new()
        .route("/api/health", get(health::health_endpoint))
        .fallback(super::web_static_handler)
        .with_state(state.clone());

    let authed_routes = Router::new()
        .route(
            "/api/tasks",
            get(tasks::list_tasks).post(tasks::create_task),
        )
        .route("/api/tasks/{id}", get(tasks::get_task))
        .route("/api/tasks/{id}/approve", post(tasks::approve_task))
        .route("/api/tasks/stream", post(stream::stream_task))
        .route("/api/tasks/stream/approve", post(stream::approve_session))
        .route("/api/tasks/stream/sessions", get(stream::list_sessions))
        .route("/api/chat", post(chat::chat_endpoint))
        .route("/api/chat/stream", post(chat::chat_stream_endpoint))
        .route("/api/tts", post(tts::tts_endpoint))
        .route("/api/voices", get(tts::voices_endpoint))
        .route("/api/models", get(chat::models_endpoint))
        .route(
            "/api/notifications",
            get(notifications::list_notifications),
        )
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .with_state(state.clone());

    authed_routes
        .merge(public_routes)
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.config.server.port))
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'; media-src 'self' blob: data:",
        ),
    );
    response
}
