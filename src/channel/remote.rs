//! Sending side of a named channel

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UnixStream;
use tokio::time::timeout;

use super::namespace::ChannelNamespace;
use super::wire;
use crate::error::TransportError;
use crate::protocol::{MessageType, Response, TransportStatus};

/// Handle to a remote endpoint
///
/// Holds at most one open stream. A stream that timed out mid-exchange may
/// still carry a late reply, so it is dropped and the next request opens a
/// fresh one.
#[derive(Debug)]
pub struct RemoteEndpoint {
    name: String,
    path: PathBuf,
    stream: Option<UnixStream>,
    max_payload_size: usize,
    send_timeout: Duration,
    receive_timeout: Duration,
    closed: bool,
}

impl RemoteEndpoint {
    /// Open a handle to the endpoint listening under `name`.
    pub async fn open(namespace: &ChannelNamespace, name: &str) -> Result<Self, TransportError> {
        let path = namespace.path_for(name)?;
        let stream = connect(name, &path).await?;
        let config = namespace.config();

        tracing::trace!(channel = %name, "Remote endpoint opened");

        Ok(Self {
            name: name.to_string(),
            path,
            stream: Some(stream),
            max_payload_size: config.max_payload_size,
            send_timeout: config.send_timeout,
            receive_timeout: config.receive_timeout,
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Override the namespace timeouts for this handle
    pub fn set_timeouts(&mut self, send_timeout: Duration, receive_timeout: Duration) {
        self.send_timeout = send_timeout;
        self.receive_timeout = receive_timeout;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send a request and wait for the reply.
    ///
    /// The send and receive budgets are applied one after the other. Failures
    /// are reported through [`Response::status`], never as an error.
    pub async fn send_request(
        &mut self,
        message_type: MessageType,
        payload: Option<Bytes>,
    ) -> Response {
        if self.closed {
            return Response::invalid(message_type);
        }

        if let Some(ref data) = payload {
            if data.len() > self.max_payload_size {
                tracing::warn!(
                    channel = %self.name,
                    size = data.len(),
                    max = self.max_payload_size,
                    "Request payload too large"
                );
                return Response::invalid(message_type);
            }
        }

        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => match connect(&self.name, &self.path).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!(channel = %self.name, error = %e, "Reconnect failed");
                    return Response::new(message_type, TransportStatus::TransportError, None);
                }
            },
        };

        let sent = timeout(
            self.send_timeout,
            wire::write_request(&mut stream, message_type.id(), payload.as_deref()),
        )
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(channel = %self.name, error = %e, "Send failed");
                return Response::new(message_type, TransportStatus::TransportError, None);
            }
            Err(_) => {
                tracing::debug!(channel = %self.name, ?message_type, "Send timed out");
                return Response::new(message_type, TransportStatus::SendTimeout, None);
            }
        }

        let received = timeout(
            self.receive_timeout,
            wire::read_response(&mut stream, self.max_payload_size),
        )
        .await;
        match received {
            Ok(Ok(data)) => {
                self.stream = Some(stream);
                Response::new(message_type, TransportStatus::Success, data)
            }
            Ok(Err(e)) => {
                tracing::debug!(channel = %self.name, error = %e, "Receive failed");
                Response::new(message_type, TransportStatus::TransportError, None)
            }
            Err(_) => {
                tracing::debug!(channel = %self.name, ?message_type, "Receive timed out");
                Response::new(message_type, TransportStatus::ReceiveTimeout, None)
            }
        }
    }

    /// Drop the stream. Later requests return [`TransportStatus::Invalid`].
    pub fn close(&mut self) {
        self.closed = true;
        self.stream = None;
    }
}

async fn connect(name: &str, path: &Path) -> Result<UnixStream, TransportError> {
    UnixStream::connect(path).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
            TransportError::Unreachable(name.to_string())
        }
        _ => TransportError::Io(e),
    })
}
