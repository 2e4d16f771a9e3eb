//! Producer and consumer pipelines
//!
//! ```text
//!  FrameSource ──► PublishStream ══ Broker ══► Subscriber ──► DeviceStream ──► DeviceSink
//!                  (filter, pool)                             (dedupe, decode,
//!                                                              timing)
//! ```
//!
//! The only backpressure is at the ends: the publish queue drops frames
//! when processing lags, and the device sink refuses frames when full.

pub mod config;
pub mod device;
pub mod publisher;
pub mod sink;
pub mod source;

pub use config::{DeviceConfig, StreamConfig};
pub use device::DeviceStream;
pub use publisher::PublishStream;
pub use sink::{DeviceSink, QueueAlteredCallback, QueuedFrame, RingBufferSink, DEFAULT_QUEUE_CAPACITY};
pub use source::{FrameCallback, FrameSource, TestPatternSource};
