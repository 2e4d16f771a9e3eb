//! # framebus
//!
//! Same-machine publish/subscribe transport for live video frames.
//!
//! A producer process runs a [`Broker`](pubsub::Broker) under a well-known
//! channel name. Consumer processes run a [`Subscriber`](pubsub::Subscriber)
//! that registers with the broker; the broker then pushes every published
//! frame to each subscriber over a reverse channel named
//! `"<broker>.<identifier>"`. Channels are Unix domain sockets in a shared
//! directory.
//!
//! ```text
//!   producer                                  consumer
//!   FrameSource ─► PublishStream ─► Broker    Subscriber ─► DeviceStream ─► sink
//!                                   "pub" ◄──── Register("A1")
//!                                         ────► ReceiveFrame ─► "pub.A1"
//! ```
//!
//! Delivery is best-effort. Connections retry on a fixed interval,
//! unreachable subscribers are skipped, malformed frames are dropped and a
//! full device queue refuses frames instead of blocking.
//!
//! ## Publishing
//!
//! ```no_run
//! use framebus::channel::ChannelNamespace;
//! use framebus::protocol::DEFAULT_BROKER_NAME;
//! use framebus::stream::{PublishStream, StreamConfig, TestPatternSource};
//!
//! # async fn example() -> framebus::Result<()> {
//! let stream = PublishStream::new(
//!     DEFAULT_BROKER_NAME,
//!     ChannelNamespace::default(),
//!     StreamConfig::default(),
//! );
//! stream.set_source(TestPatternSource::new(640, 480));
//! stream.start()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Consuming
//!
//! ```no_run
//! use framebus::channel::ChannelNamespace;
//! use framebus::protocol::DEFAULT_BROKER_NAME;
//! use framebus::stream::{DeviceConfig, DeviceStream};
//!
//! # async fn example() -> framebus::Result<()> {
//! let (device, queue) = DeviceStream::with_ring_buffer(
//!     DEFAULT_BROKER_NAME,
//!     ChannelNamespace::default(),
//!     DeviceConfig::default(),
//! );
//! device.start()?;
//!
//! while let Some(queued) = queue.dequeue() {
//!     println!("frame {} at {:?}", queued.frame.id, queued.timing.presentation);
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod connection;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod pubsub;
pub mod raster;
pub mod stats;
pub mod stream;
pub mod timer;

pub use error::{Error, Result};
pub use frame::Frame;
pub use pubsub::{Broker, Subscriber};
pub use stream::{DeviceStream, PublishStream};
