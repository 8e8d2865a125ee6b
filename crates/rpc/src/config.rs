//! Configuration for dialing and pooling.
//!
//! Connect/read/write deadlines belong to the connection the dialer hands
//! out; the pool and the caller add none of their own.

use std::time::Duration;
use streaming::MuxConfig;

/// Settings for [`TcpDialer`](crate::TcpDialer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialerConfig {
    /// Upper bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm on dialed sockets.
    pub nodelay: bool,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            nodelay: true,
        }
    }
}

impl DialerConfig {
    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable `TCP_NODELAY`.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

/// Settings for [`SessionPool`](crate::SessionPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Multiplexer settings applied to every session the pool creates.
    pub mux: MuxConfig,
    /// How long a failed call waits for its session to report the link down
    /// before treating the failure as confined to its own stream.
    pub failure_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            mux: MuxConfig::default(),
            failure_grace: Duration::from_millis(100),
        }
    }
}

impl PoolConfig {
    pub fn with_mux(mut self, mux: MuxConfig) -> Self {
        self.mux = mux;
        self
    }

    /// Set the grace period used to classify stream failures.
    pub fn with_failure_grace(mut self, grace: Duration) -> Self {
        self.failure_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialer_config_builder() {
        let config = DialerConfig::default()
            .with_connect_timeout(Duration::from_millis(250))
            .with_nodelay(false);

        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert!(!config.nodelay);
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.mux, MuxConfig::default());
        assert_eq!(config.failure_grace, Duration::from_millis(100));

        let config = config
            .with_mux(MuxConfig::default().with_max_streams(16))
            .with_failure_grace(Duration::ZERO);
        assert_eq!(config.mux.max_streams, 16);
        assert_eq!(config.failure_grace, Duration::ZERO);
    }
}
