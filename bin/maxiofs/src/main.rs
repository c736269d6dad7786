//! MaxIOFS - S3-compatible object storage server
//!
//! One process serves the S3 data plane, the console management API,
//! and the background workers (lifecycle, replication, events, health).

mod auth_middleware;
mod console;
mod metrics_middleware;
mod s3;
mod state;

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maxiofs_auth::{IdentityStore, SessionManager};
use maxiofs_blob::{BlobStore, MasterKey};
use maxiofs_cluster::{ClusterRouter, ClusterShipper, HealthChecker};
use maxiofs_common::Config;
use maxiofs_engine::events::EventWorker;
use maxiofs_engine::lifecycle::LifecycleWorker;
use maxiofs_engine::replication::ReplicationWorker;
use maxiofs_engine::Engine;
use maxiofs_meta::MetaStore;
use maxiofs_s3::s3_metrics;
use state::AppState;

/// Prometheus metrics endpoint handler (mounted on both listeners)
pub(crate) async fn metrics_handler() -> impl IntoResponse {
    let metrics = s3_metrics().export_prometheus();
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

#[derive(Parser, Debug)]
#[command(name = "maxiofs")]
#[command(about = "MaxIOFS S3-compatible object storage server")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/maxiofs/config.yaml")]
    config: PathBuf,
}

fn main() {
    let args = Args::parse();

    // Config problems exit 2, startup failures exit 1
    let config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        error!("startup failed: {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting MaxIOFS");
    info!("Data directory: {}", config.node.data_dir.display());

    // Stores
    let meta = Arc::new(MetaStore::open(config.metadata_dir().join("meta.redb"))?);
    let blobs = Arc::new(BlobStore::open(config.objects_dir())?);
    let master_key = config.master_key_bytes().map(MasterKey::new);
    if master_key.is_some() {
        info!("Encryption at rest is available (master key configured)");
    }

    let engine = Engine::new(
        meta.clone(),
        blobs,
        config.s3.region.clone(),
        master_key.clone(),
        config.storage.compression.then_some(config.storage.compression_level),
    );

    // Identity & sessions
    let identity = Arc::new(IdentityStore::new(meta.clone(), master_key));
    identity
        .bootstrap_admin(&config.auth.admin_user, &config.auth.admin_password)
        .map_err(|e| anyhow::anyhow!("bootstrap admin: {e}"))?;

    let jwt_secret = if config.auth.jwt_secret.is_empty() {
        // Fall back to a key derived from the master key, or an
        // ephemeral one (sessions then die with the process)
        config
            .master_key_bytes()
            .map(|k| k.to_vec())
            .unwrap_or_else(|| {
                use rand::RngCore;
                let mut buf = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut buf);
                info!("no jwt_secret configured; console sessions will not survive restart");
                buf
            })
    } else {
        hex::decode(&config.auth.jwt_secret)
            .map_err(|_| anyhow::anyhow!("auth.jwt_secret is not valid hex"))?
    };
    let sessions = Arc::new(SessionManager::new(
        &jwt_secret,
        config.console.session_ttl_secs,
    ));

    // Cluster
    let cluster = Arc::new(ClusterRouter::new(meta.clone()));

    let app_state = AppState::new(
        config.clone(),
        engine.clone(),
        identity,
        cluster.clone(),
        sessions,
    );

    // Background workers share a shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let lifecycle = LifecycleWorker::new(
        engine.clone(),
        Duration::from_secs(config.workers.lifecycle_interval_secs),
        config.workers.lifecycle_scan_limit,
        Duration::from_secs(config.workers.multipart_expiry_secs),
    );
    tokio::spawn(lifecycle.run(shutdown_rx.clone()));

    let shipper = Arc::new(ClusterShipper::new(cluster.clone()));
    let replication = ReplicationWorker::new(
        engine.clone(),
        Some(shipper),
        Duration::from_secs(config.workers.replication_interval_secs),
    );
    tokio::spawn(replication.run(shutdown_rx.clone()));

    let events = EventWorker::new(engine.clone(), Duration::from_secs(5));
    tokio::spawn(events.run(shutdown_rx.clone()));

    let health = HealthChecker::new(
        cluster.clone(),
        Duration::from_secs(config.cluster.health_interval_secs),
        config.cluster.health_failure_threshold,
    );
    tokio::spawn(health.run(shutdown_rx.clone()));

    // Gauge refresher for the Prometheus exporter
    {
        let engine = engine.clone();
        let state = app_state.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                    _ = rx.changed() => {
                        if *rx.borrow() { return; }
                    }
                }
                if let Ok(tenants) = state.identity.list_tenants() {
                    for tenant in tenants {
                        if let Ok(usage) = state.identity.tenant_usage(&tenant.id) {
                            s3_metrics()
                                .set_tenant_storage(&tenant.name, usage.storage_bytes.max(0) as u64);
                        }
                    }
                }
                if let Ok(backlog) = engine.replication_backlog() {
                    s3_metrics().set_replication_backlog(backlog as u64);
                }
                s3_metrics().set_events_dropped(
                    engine
                        .stats
                        .events_dropped
                        .load(std::sync::atomic::Ordering::Relaxed),
                );
            }
        });
    }

    // Listeners
    let s3_app = s3::router(app_state.clone());
    let console_app = console::router(app_state.clone());

    let s3_listener = TcpListener::bind(config.s3.listen).await?;
    let console_listener = TcpListener::bind(config.console.listen).await?;
    info!("S3 API listening on {}", config.s3.listen);
    info!("Console API listening on {}", config.console.listen);

    let s3_shutdown = shutdown_rx.clone();
    let s3_server = tokio::spawn(async move {
        axum::serve(
            s3_listener,
            s3_app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for_shutdown(s3_shutdown))
        .await
    });

    let console_shutdown = shutdown_rx.clone();
    let console_server = tokio::spawn(async move {
        axum::serve(
            console_listener,
            console_app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for_shutdown(console_shutdown))
        .await
    });

    // Signal handling
    shutdown_signal().await;
    info!("Shutting down...");
    shutdown_tx.send(true).ok();

    s3_server.await??;
    console_server.await??;
    info!("MaxIOFS shut down gracefully");
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
