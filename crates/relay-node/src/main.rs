//! Relay Node
//!
//! Runs one producer or consumer node until Ctrl+C or SIGTERM.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder, if configured
//! 3. List capture devices
//! 4. Spawn the node with the test pattern capture and logging sink
//! 5. Wait for a shutdown signal or for the node to fail

#![warn(clippy::pedantic)]

use std::sync::Arc;

use relay_node::config::Config;
use relay_node::devices::log_candidate_devices;
use relay_node::devices::synthetic::{LoggingSinkBackend, TestPatternBackend};
use relay_node::node::RelayNode;
use relay_node::observability::init_metrics_recorder;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_node=debug,media_protocol=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Relay Node");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        role = %config.role,
        capture_role = %config.capture_role,
        bind_ip = %config.bind_ip,
        data_port = config.data_port,
        control_port = config.control_port,
        discovery_port = config.discovery_port,
        frame_rate = config.frame_rate,
        "Configuration loaded successfully"
    );

    if let Some(addr) = config.metrics_bind_address {
        info!(%addr, "Initializing Prometheus metrics recorder...");
        init_metrics_recorder(addr).map_err(|e| {
            error!(error = %e, "Failed to install Prometheus metrics recorder");
            e
        })?;
    }

    let capture_backend = Arc::new(TestPatternBackend::new(config.test_pattern));
    log_candidate_devices(capture_backend.as_ref());

    let node = RelayNode::spawn(config, capture_backend, Arc::new(LoggingSinkBackend)).await;

    let mut status = node.subscribe_status();
    let status_task = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().to_string();
            info!(status = %current, "Status");
        }
    });

    let result = tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, stopping node...");
            node.stop().await
        }
        result = node.wait() => result,
    };
    status_task.abort();

    match result {
        Ok(()) => {
            info!("Relay Node shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Relay Node exited with error");
            Err(e.into())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
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
