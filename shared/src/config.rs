use std::time::Duration;

/// Peer-wide tunables shared by every connection the peer owns.
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Time to wait for a connection attempt to progress before giving up.
    pub connect_timeout: Duration,
    pub connection: ConnectionConfig,
    pub quality: QualityThresholds,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(10_000),
            connection: ConnectionConfig::default(),
            quality: QualityThresholds::default(),
        }
    }
}

/// Per-connection tunables.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Time without receiving any frame before the connection times out.
    pub timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            heartbeat_interval: Duration::from_millis(1_000),
        }
    }
}

/// Thresholds that trigger a local, quality-driven disconnect.
#[derive(Clone, Debug)]
pub struct QualityThresholds {
    pub max_avg_send_attempts: f64,
    pub avg_send_attempts_resilience: usize,
    pub max_send_attempts: u32,
    pub max_notify_loss: f64,
    pub notify_loss_resilience: usize,
    pub can_quality_disconnect: bool,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            max_avg_send_attempts: 5.0,
            avg_send_attempts_resilience: 64,
            max_send_attempts: 15,
            max_notify_loss: 0.05,
            notify_loss_resilience: 64,
            can_quality_disconnect: true,
        }
    }
}
