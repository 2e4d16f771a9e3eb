//! Stream configuration

use crate::frame::DEFAULT_FPS;
use crate::pubsub::{BrokerConfig, SubscriberConfig};

use super::sink::DEFAULT_QUEUE_CAPACITY;

/// Producer pipeline options
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Frame rate stamped on frames whose source left it unset
    pub fps: u32,

    /// Raster buffers allocated up front
    pub pool_min_buffers: usize,

    /// Raster buffers the pool may hold at once
    pub pool_max_buffers: usize,

    /// Frames waiting for processing before the source's frames are dropped
    pub channel_capacity: usize,

    /// Settings for the broker the stream publishes through
    pub broker: BrokerConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            pool_min_buffers: 5,
            pool_max_buffers: 8,
            channel_capacity: 4,
            broker: BrokerConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Set the default frame rate
    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    /// Set the pool bounds. `max` is raised to `min` if smaller.
    pub fn pool_buffers(mut self, min: usize, max: usize) -> Self {
        self.pool_min_buffers = min;
        self.pool_max_buffers = max.max(min).max(1);
        self
    }

    /// Set the processing backlog
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the broker configuration
    pub fn broker(mut self, config: BrokerConfig) -> Self {
        self.broker = config;
        self
    }
}

/// Consumer pipeline options
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Capacity of the ring buffer created by `DeviceStream::with_ring_buffer`
    pub queue_capacity: usize,

    /// Settings for the subscriber the device receives through
    pub subscriber: SubscriberConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            subscriber: SubscriberConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Set the ring buffer capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the subscriber configuration
    pub fn subscriber(mut self, config: SubscriberConfig) -> Self {
        self.subscriber = config;
        self
    }
}
