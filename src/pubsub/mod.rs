//! Publish/subscribe over named channels
//!
//! A [`Broker`] listens under a well-known name and keeps one reverse
//! [`Connection`](crate::connection::Connection) per registered
//! [`Subscriber`]. Delivery is best-effort: a subscriber that cannot be
//! reached is skipped, never waited on.

pub mod broker;
pub mod config;
pub mod subscriber;
pub mod subscribers;

pub use broker::{Broker, FrameProvider, FrameSink, PublishReport};
pub use config::{BrokerConfig, SubscriberConfig};
pub use subscriber::{FrameHandler, Subscriber};
pub use subscribers::{Registration, SubscriberSet};
