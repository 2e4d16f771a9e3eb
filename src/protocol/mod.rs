//! Request/response protocol shared by brokers and subscribers
//!
//! A request is a `(MessageType, Option<Bytes>)` pair; the reply is an
//! optional payload. Acknowledgements are a single [`ResponseCode`] byte.

pub mod message;
pub mod response;

pub use message::{MessageType, ResponseCode};
pub use response::{Response, TransportStatus};

/// Well-known channel name brokers listen on by default
pub const DEFAULT_BROKER_NAME: &str = "com.framebus.conductor";

/// Build the reverse channel name a broker uses to reach a subscriber
pub fn subscriber_channel_name(broker_name: &str, identifier: &str) -> String {
    format!("{}.{}", broker_name, identifier)
}
