#![forbid(unsafe_code)]

use std::net::SocketAddr;

use sni_relay_lib::config::{self, LoggingConfig};
use sni_relay_lib::proxy::{self, default_routes, ProxyContext};
use sni_relay_lib::security;
use sni_relay_lib::telemetry;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Validation failures are printed before tracing exists; the message
    // enumerates every failed check.
    let cfg = match config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    init_tracing(&cfg.logging);

    info!(
        port = cfg.port,
        health_port = cfg.health_port,
        connect_timeout_ms = cfg.connect_timeout.as_millis() as u64,
        proxy_timeout_ms = cfg.proxy_timeout.as_millis() as u64,
        preread_timeout_ms = cfg.preread_timeout.as_millis() as u64,
        rate_limit_per_ip = cfg.rate_limit_per_ip,
        "configuration loaded"
    );

    let port = cfg.port;
    let health_port = cfg.health_port;
    let ctx = ProxyContext::new(cfg, default_routes());

    let proxy_listener = bind_or_exit(SocketAddr::from(([0, 0, 0, 0], port))).await;
    let health_listener = bind_or_exit(SocketAddr::from(([0, 0, 0, 0], health_port))).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(watch_signals(shutdown_tx));

    let sweeper = security::spawn_sweeper(
        ctx.rate_limiter.clone(),
        security::rate_limit::WINDOW,
    );

    let sidecar = {
        let ctx = ctx.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(err) = telemetry::run(health_listener, ctx, shutdown).await {
                error!(%err, "observability server error");
            }
        })
    };

    if let Err(err) = proxy::run(ctx, proxy_listener, shutdown_rx).await {
        error!(%err, "proxy exited with error");
        std::process::exit(1);
    }

    sweeper.abort();
    let _ = sidecar.await;
    info!("shutdown complete");
}

async fn bind_or_exit(addr: SocketAddr) -> TcpListener {
    match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, error = %err, "failed to bind listener");
            std::process::exit(1);
        }
    }
}

/// SIGTERM and SIGINT both initiate the graceful shutdown; anything after
/// the first is swallowed so a double Ctrl-C cannot interrupt the drain.
async fn watch_signals(shutdown: watch::Sender<bool>) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "failed to install SIGINT handler");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }
    let _ = shutdown.send(true);

    loop {
        tokio::select! {
            _ = sigterm.recv() => debug!("shutdown already in progress"),
            _ = sigint.recv() => debug!("shutdown already in progress"),
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);
    if logging.pretty {
        builder.pretty().init();
    } else {
        builder.init();
    }
}
