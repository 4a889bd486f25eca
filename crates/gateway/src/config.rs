//! Gateway process configuration - distinct from the space configuration
//! loaded at runtime (`space_config`), keeping the process config separate
//! from the per-space participant data loaded at startup.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "mew-gateway")]
#[command(about = "MEW gateway - capability-enforcing WebSocket broker for a multi-participant space")]
pub struct GatewayConfig {
    /// Address the WebSocket/HTTP listener binds to.
    #[arg(long, env = "AOR_MEW_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Path to the static space configuration file.
    #[arg(long, env = "AOR_MEW_SPACE_CONFIG", default_value = "space.yaml")]
    pub space_config: String,

    /// Maximum accepted envelope size in bytes.
    #[arg(long, env = "AOR_MEW_MAX_ENVELOPE_BYTES", default_value = "1048576")]
    pub max_envelope_bytes: usize,

    /// Interval between server-initiated WS pings.
    #[arg(long, env = "AOR_MEW_HEARTBEAT_INTERVAL_SECS", default_value = "30")]
    pub heartbeat_interval_secs: u64,

    /// Per-connection bounded outbound queue depth.
    #[arg(long, env = "AOR_MEW_OUTBOUND_QUEUE_CAPACITY", default_value = "1000")]
    pub outbound_queue_capacity: usize,

    /// Per-connection bounded outbound queue size in bytes.
    #[arg(long, env = "AOR_MEW_OUTBOUND_QUEUE_BYTES", default_value = "16777216")]
    pub outbound_queue_bytes: usize,

    /// Maximum number of open proposals retained by the LRU tracker.
    #[arg(long, env = "AOR_MEW_PROPOSAL_LRU_OPEN", default_value = "10000")]
    pub proposal_lru_open: usize,

    /// Maximum number of closed (resolved) proposals retained for
    /// late-arriving references.
    #[arg(long, env = "AOR_MEW_PROPOSAL_LRU_CLOSED", default_value = "100000")]
    pub proposal_lru_closed: usize,

    /// Directory audit logs are written to.
    #[arg(long, env = "AOR_MEW_AUDIT_LOG_DIR", default_value = "./audit-logs")]
    pub audit_log_dir: String,

    /// Size in bytes at which an audit log file is rotated.
    #[arg(long, env = "AOR_MEW_AUDIT_LOG_ROTATE_BYTES", default_value = "104857600")]
    pub audit_log_rotate_bytes: u64,

    /// Whether `system/error` payloads include the participant's full
    /// current capability set or just the attempted kind.
    #[arg(long, env = "AOR_MEW_VERBOSE_REJECTIONS", default_value = "true")]
    pub verbose_rejections: bool,
}
