//! Statistics for brokers and frame pipelines

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::connection::ConnectionStatus;

/// Snapshot of one registered subscriber as seen by the broker
#[derive(Debug, Clone)]
pub struct SubscriberMetrics {
    /// Identifier the subscriber registered with
    pub identifier: String,
    /// Reverse channel name the broker delivers to
    pub channel_name: String,
    /// Connection status
    pub status: ConnectionStatus,
    /// Last successful connect or delivery
    pub last_response: Option<Instant>,
}

impl SubscriberMetrics {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Time since the subscriber last answered
    pub fn since_last_response(&self) -> Option<Duration> {
        self.last_response.map(|t| t.elapsed())
    }
}

/// Broker-wide statistics
#[derive(Debug, Clone)]
pub struct BrokerStats {
    /// Channel name the broker listens on
    pub channel_name: String,
    /// Whether the listening endpoint is open
    pub running: bool,
    /// Time since the broker was created
    pub uptime: Duration,
    /// `publish()` calls
    pub frames_published: u64,
    /// Successful per-subscriber deliveries
    pub deliveries: u64,
    /// Failed per-subscriber deliveries
    pub delivery_failures: u64,
    /// One entry per registered subscriber
    pub subscribers: Vec<SubscriberMetrics>,
}

impl BrokerStats {
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn connected_count(&self) -> usize {
        self.subscribers.iter().filter(|s| s.is_connected()).count()
    }

    /// Published frames per second since creation
    pub fn publish_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.frames_published as f64 / secs
        } else {
            0.0
        }
    }
}

/// Live counters shared between a broker and its callers
#[derive(Debug)]
pub(crate) struct BrokerCounters {
    pub started_at: Instant,
    pub frames_published: AtomicU64,
    pub deliveries: AtomicU64,
    pub delivery_failures: AtomicU64,
}

impl BrokerCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frames_published: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
        }
    }
}

/// Snapshot of a producer or consumer pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Time since the pipeline was created
    pub duration: Duration,
    /// Frames handed to the pipeline (by the source or the subscriber)
    pub received: u64,
    /// Frames dropped because their id matched the previous frame
    pub duplicates: u64,
    /// Frames that failed to deserialize or decode
    pub decode_failures: u64,
    /// Frames dropped because no raster buffer was available
    pub raster_failures: u64,
    /// Frames dropped because processing lagged behind the source
    pub dropped_backlog: u64,
    /// Frames the device sink refused because its queue was full
    pub dropped_queue_full: u64,
    /// Frames accepted by the device sink
    pub enqueued: u64,
    /// Frames handed to the broker
    pub published: u64,
    /// Per-subscriber delivery failures reported by the broker
    pub publish_failures: u64,
}

impl PipelineStats {
    /// Frames that made it out of the pipeline
    pub fn delivered(&self) -> u64 {
        self.enqueued + self.published
    }

    /// Frames dropped for any reason, duplicates included
    pub fn dropped(&self) -> u64 {
        self.duplicates
            + self.decode_failures
            + self.raster_failures
            + self.dropped_backlog
            + self.dropped_queue_full
    }

    /// Output frame rate since creation
    pub fn frame_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.delivered() as f64 / secs
        } else {
            0.0
        }
    }
}

/// Live pipeline counters
#[derive(Debug)]
pub(crate) struct PipelineCounters {
    started_at: Instant,
    pub received: AtomicU64,
    pub duplicates: AtomicU64,
    pub decode_failures: AtomicU64,
    pub raster_failures: AtomicU64,
    pub dropped_backlog: AtomicU64,
    pub dropped_queue_full: AtomicU64,
    pub enqueued: AtomicU64,
    pub published: AtomicU64,
    pub publish_failures: AtomicU64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            received: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            raster_failures: AtomicU64::new(0),
            dropped_backlog: AtomicU64::new(0),
            dropped_queue_full: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            duration: self.started_at.elapsed(),
            received: self.received.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            raster_failures: self.raster_failures.load(Ordering::Relaxed),
            dropped_backlog: self.dropped_backlog.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}
