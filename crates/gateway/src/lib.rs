//! MEW gateway - the capability-enforcing WebSocket broker for a single
//! multi-participant space.
//!
//! Responsibilities:
//! - Accept WebSocket connections, authenticate against the static space
//!   configuration, and track presence.
//! - Enforce per-message capabilities by pattern-matching envelope
//!   payloads.
//! - Route unicast/broadcast envelopes and track proposal lifecycles.
//! - Write dual append-only audit logs.
//!
//! Key property: the router is the sole mutator of shared state; every
//! other task only exchanges messages with it.

pub mod audit;
pub mod codec;
pub mod config;
pub mod connection;
pub mod proposal;
pub mod registry;
pub mod router;
pub mod space_config;

use std::path::Path;
use std::sync::Arc;

use axum::routing::get;
use axum::Router as AxumRouter;
use tokio::sync::mpsc;
use tracing::info;

use audit::AuditLog;
use config::GatewayConfig;
use router::{Router, RouterCommand};
use space_config::SpaceConfig;

#[derive(Clone)]
pub struct GatewayState {
    pub router: mpsc::Sender<RouterCommand>,
    pub space_config: Arc<SpaceConfig>,
    pub config: Arc<GatewayConfig>,
}

/// Build the router actor and the axum app that talks to it, without
/// binding a listener. Splitting this out from `serve` is what lets
/// integration tests drive a real gateway over an ephemeral port.
pub fn build(config: GatewayConfig, space_config: SpaceConfig, audit: AuditLog) -> (AxumRouter, GatewayState) {
    let (router_tx, router_rx) = mpsc::channel::<RouterCommand>(1024);
    let router = Router::new(
        config.proposal_lru_open,
        config.proposal_lru_closed,
        audit,
        config.verbose_rejections,
    );
    tokio::spawn(router.run(router_rx));

    let state = GatewayState {
        router: router_tx,
        space_config: Arc::new(space_config),
        config: Arc::new(config),
    };

    let app = AxumRouter::new()
        .route("/ws", get(connection::ws_handler))
        .with_state(state.clone());

    (app, state)
}

/// Load configuration from disk, build the gateway, bind its listener and
/// serve until the process receives a shutdown signal.
pub async fn serve(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("configuration loaded:");
    info!("  bind: {}", config.bind_addr);
    info!("  space config: {}", config.space_config);
    info!("  max envelope bytes: {}", config.max_envelope_bytes);
    info!("  verbose rejections: {}", config.verbose_rejections);

    let space_config = SpaceConfig::load(Path::new(&config.space_config))?;
    info!("space {:?} loaded with {} participant(s)", space_config.space.id, space_config.participants.len());

    let audit = AuditLog::open(Path::new(&config.audit_log_dir), config.audit_log_rotate_bytes)?;
    let bind_addr = config.bind_addr.clone();

    let (app, _state) = build(config, space_config, audit);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => tracing::error!("failed to install ctrl-c handler: {e}"),
    }
}
