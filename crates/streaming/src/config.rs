//! Configuration for multiplexed sessions.

/// Tuning knobs shared by both ends of a multiplexed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxConfig {
    /// Largest payload carried by a single data frame. Longer writes are split.
    pub max_frame_size: usize,
    /// Inbound streams queued before `accept` picks them up.
    pub accept_backlog: usize,
    /// Maximum number of streams this side keeps open at once. Opening more
    /// waits until one is dropped.
    pub max_streams: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024,
            accept_backlog: 256,
            max_streams: 8192,
        }
    }
}

impl MuxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum data frame payload size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size.max(1);
        self
    }

    /// Set the accept backlog.
    pub fn with_accept_backlog(mut self, backlog: usize) -> Self {
        self.accept_backlog = backlog.max(1);
        self
    }

    /// Set the per-session stream limit.
    pub fn with_max_streams(mut self, limit: usize) -> Self {
        self.max_streams = limit.max(1);
        self
    }

    pub(crate) fn yamux_config(&self) -> yamux::Config {
        let mut config = yamux::Config::default();
        // yamux still counts a stream until its next poll after the handle
        // drops, so its own limit sits above the one enforced by permits
        config
            .set_max_num_streams(self.max_streams.saturating_mul(2))
            .set_split_send_size(self.max_frame_size);
        config
    }
}
