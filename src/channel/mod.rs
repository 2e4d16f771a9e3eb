//! Named channel transport
//!
//! Processes find each other by channel name. A listener binds an
//! [`Endpoint`] under a name; any process in the same [`ChannelNamespace`]
//! can open a [`RemoteEndpoint`] to it and exchange request/reply pairs.

pub mod config;
pub mod endpoint;
pub mod namespace;
pub mod remote;
pub mod wire;

pub use config::ChannelConfig;
pub use endpoint::{Endpoint, RequestHandler};
pub use namespace::ChannelNamespace;
pub use remote::RemoteEndpoint;
