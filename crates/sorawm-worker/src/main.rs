//! Watermark-removal worker binary.

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sorawm_notify::TelegramNotifier;
use sorawm_worker::{run_worker_once, RestartBackoff, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("sorawm=info".parse().unwrap())
        .add_directive("chromiumoxide=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting sorawm-worker");

    let config = match WorkerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load worker config: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        target_url = %config.target_url,
        strategy = ?config.strategy,
        proxies = config.proxy_pool.len(),
        "Worker config loaded"
    );

    let notifier = TelegramNotifier::from_env();

    // OS signals terminate promptly; the in-flight task is abandoned
    // to the queue's own staleness handling.
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, exiting");
        std::process::exit(0);
    });

    // Supervisor: a crash escalates the restart delay, a clean stop
    // (the failure-threshold circuit breaker) restarts immediately
    // and resets the escalation.
    let mut backoff = RestartBackoff::new(config.restart_delay_initial, config.restart_delay_max);
    loop {
        match run_worker_once(&config, &notifier).await {
            Ok(()) => {
                warn!("Worker loop stopped, restarting immediately");
                backoff.on_clean_exit();
            }
            Err(e) => {
                let delay = backoff.on_crash();
                error!("Worker loop crashed: {e}");
                notifier
                    .send_message(&format!(
                        "Worker crashed, restarting in {}s: {e}",
                        delay.as_secs()
                    ))
                    .await;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {e}");
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}
