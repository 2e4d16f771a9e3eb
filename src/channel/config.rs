//! Channel transport configuration

use std::path::PathBuf;
use std::time::Duration;

/// Default cap on a single request or response payload (64 MiB)
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Default send and receive timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport configuration shared by every endpoint in a namespace
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Directory holding one socket file per channel name
    pub dir: PathBuf,

    /// Largest payload accepted in either direction
    pub max_payload_size: usize,

    /// Budget for writing a request
    pub send_timeout: Duration,

    /// Budget for reading the reply, counted after the send completes
    pub receive_timeout: Duration,

    /// Depth of the per-endpoint dispatch queue
    pub dispatch_queue_depth: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        let base = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Self {
            dir: base.join("framebus"),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            send_timeout: DEFAULT_REQUEST_TIMEOUT,
            receive_timeout: DEFAULT_REQUEST_TIMEOUT,
            dispatch_queue_depth: 64,
        }
    }
}

impl ChannelConfig {
    /// Create a config rooted at a specific directory
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the channel directory
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Set the maximum payload size
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size.min(u32::MAX as usize);
        self
    }

    /// Set both send and receive timeouts
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self.receive_timeout = timeout;
        self
    }

    /// Set the send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the receive timeout
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Set the dispatch queue depth
    pub fn dispatch_queue_depth(mut self, depth: usize) -> Self {
        self.dispatch_queue_depth = depth.max(1);
        self
    }
}
