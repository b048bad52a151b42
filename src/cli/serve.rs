use anyhow::Result;
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::ServeFlags;
use crate::core::config::AppConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::terminal::{self, GuideSection, print_warn};
use crate::interfaces::web::{ApiServer, AppState};
use crate::logging;
use crate::platform::{NativePlatform, Platform};

pub async fn run_serve(flags: ServeFlags) -> Result<()> {
    let log_tx = logging::init(flags.verbose, false);

    let data_dir = NativePlatform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    NativePlatform::restrict_dir_permissions(&data_dir);

    let mut config = AppConfig::load(flags.config.as_deref())?;
    if let Some(host) = flags.host {
        config.server.host = host;
    }
    if let Some(port) = flags.port {
        config.server.port = port;
    }

    let tls = config.server.tls_paths(&data_dir);
    terminal::print_banner();
    terminal::print_service_summary(&config, tls.is_some());

    let state = AppState::from_config(config, log_tx);
    if !state.is_loopback() && state.config.server.token_hashes.is_empty() {
        print_warn(
            "No API tokens configured on a non-loopback address; every API call will be refused. Run 'solo token'.",
        );
    }

    let server = ApiServer::new(state).with_tls(tls.clone());
    let scheme = server.scheme();
    let server = Arc::new(Mutex::new(server));
    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(server.clone());
    lifecycle.start().await?;

    let addr = server
        .lock()
        .await
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    terminal::print_link("Dashboard", &format!("{}://{}", scheme, addr));
    let mut section =
        GuideSection::new("Server Started").status("Data dir", &data_dir.display().to_string());
    if let Some(tls) = &tls {
        section = section.status("Certificate", &tls.cert.display().to_string());
    }
    section
        .blank()
        .text(&format!(
            "Press {} to stop the server.",
            style("Ctrl+C").bold().yellow()
        ))
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await?;
    terminal::print_goodbye();
    Ok(())
}
