pub(crate) mod auth;
mod handlers;
mod router;
#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{StatusCode, Uri, header},
    response::IntoResponse,
    response::sse::{Event, Sse},
};
use axum_server::tls_rustls::RustlsConfig;
use include_dir::{Dir, include_dir};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::core::approval::{HttpPolicyGate, PolicyContext, PolicyGate};
use crate::core::config::{AppConfig, TlsPaths};
use crate::core::executor::BackgroundExecutor;
use crate::core::jobs::JobStore;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::llm::OllamaClient;
use crate::core::notify::{self, NotificationSink};
use crate::core::stream::{SessionTable, StreamingExecutor};
use crate::core::tts::KokoroClient;

pub(crate) use router::build_api_router;

static FRONTEND_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/frontend");

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<AppConfig>,
    pub(crate) background: Arc<BackgroundExecutor>,
    pub(crate) streaming: Arc<StreamingExecutor>,
    pub(crate) policy: Arc<dyn PolicyGate>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) ollama: Arc<OllamaClient>,
    pub(crate) kokoro: Arc<KokoroClient>,
    pub(crate) log_tx: broadcast::Sender<String>,
}

impl AppState {
    /// Wire every service from configuration, with the notification sink it
    /// selects.
    pub(crate) fn from_config(config: AppConfig, log_tx: broadcast::Sender<String>) -> Self {
        let notifier = notify::sink_from_config(&config.notifications);
        let policy: Arc<dyn PolicyGate> = Arc::new(HttpPolicyGate::from_config(&config.policy));
        Self::with_services(config, policy, notifier, log_tx)
    }

    pub(crate) fn with_services(
        config: AppConfig,
        policy: Arc<dyn PolicyGate>,
        notifier: Arc<dyn NotificationSink>,
        log_tx: broadcast::Sender<String>,
    ) -> Self {
        let background = Arc::new(BackgroundExecutor::new(
            config.agent.clone(),
            Arc::new(JobStore::new()),
            notifier.clone(),
        ));
        let streaming = Arc::new(StreamingExecutor::new(
            config.agent.clone(),
            &config.streaming,
            Arc::new(SessionTable::new()),
            notifier.clone(),
        ));
        Self {
            ollama: Arc::new(OllamaClient::from_config(&config.chat)),
            kokoro: Arc::new(KokoroClient::from_config(&config.tts)),
            config: Arc::new(config),
            background,
            streaming,
            policy,
            notifier,
            log_tx,
        }
    }

    pub(crate) fn jobs(&self) -> &Arc<JobStore> {
        self.background.jobs()
    }

    pub(crate) fn policy_context(&self, session_id: &str) -> PolicyContext {
        PolicyContext {
            environment: self.config.policy.environment.clone(),
            agent_id: self.config.policy.agent_id.clone(),
            session_id: session_id.to_string(),
        }
    }

    pub(crate) fn is_loopback(&self) -> bool {
        matches!(
            self.config.server.host.as_str(),
            "127.0.0.1" | "::1" | "localhost"
        )
    }
}

const TLS_DRAIN_GRACE: Duration = Duration::from_secs(5);

pub struct ApiServer {
    state: AppState,
    tls: Option<TlsPaths>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ApiServer {
    pub(crate) fn new(state: AppState) -> Self {
        Self {
            state,
            tls: None,
            local_addr: None,
            shutdown_tx: None,
        }
    }

    /// Terminate TLS with these files instead of serving plain HTTP.
    pub fn with_tls(mut self, tls: Option<TlsPaths>) -> Self {
        self.tls = tls;
        self
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() { "https" } else { "http" }
    }

    /// The bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

async fn web_static_handler(uri: Uri) -> impl IntoResponse {
    let mut path = uri.path().trim_start_matches('/');
    if path.is_empty() {
        path = "index.html";
    }

    match FRONTEND_DIR
        .get_file(path)
        .map(|file| (path, file))
        .or_else(|| FRONTEND_DIR.get_file("index.html").map(|f| ("index.html", f)))
    {
        Some((served, file)) => {
            let mime = mime_guess::from_path(served).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                file.contents(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
    }
}

async fn load_rustls(tls: &TlsPaths) -> Result<RustlsConfig> {
    // rustls needs a process-wide provider before a server config is built
    let _ = rustls::crypto::ring::default_provider().install_default();
    RustlsConfig::from_pem_file(&tls.cert, &tls.key)
        .await
        .with_context(|| {
            format!(
                "failed to load TLS certificate {} and key {}",
                tls.cert.display(),
                tls.key.display()
            )
        })
}

// --- Lifecycle Implementation ---

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let rustls = match &self.tls {
            Some(tls) => Some(load_rustls(tls).await?),
            None => None,
        };

        let addr = format!(
            "{}:{}",
            self.state.config.server.host, self.state.config.server.port
        );
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind API server to {}", addr))?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);
        let app = build_api_router(self.state.clone());

        let Some(rustls) = rustls else {
            tokio::spawn(async move {
                info!("API Server running at http://{}", local_addr);
                let served = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!("API Server crashed: {}", e);
                }
            });
            return Ok(());
        };

        let handle = axum_server::Handle::new();
        let stopper = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown_rx.await;
            stopper.graceful_shutdown(Some(TLS_DRAIN_GRACE));
        });
        let listener = listener.into_std()?;
        tokio::spawn(async move {
            info!("API Server running at https://{}", local_addr);
            let served = axum_server::from_tcp_rustls(listener, rustls)
                .handle(handle)
                .serve(app.into_make_service())
                .await;
            if let Err(e) = served {
                tracing::error!("API Server crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server shutting down...");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}
