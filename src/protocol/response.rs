//! Request outcome as seen by the sender

use bytes::Bytes;

use super::message::{MessageType, ResponseCode};

/// Transport-level outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// Request delivered and a (possibly empty) reply received
    Success,
    /// Request could not be written within the send timeout
    SendTimeout,
    /// Reply did not arrive within the receive timeout
    ReceiveTimeout,
    /// Handle is not connected or has been closed
    Invalid,
    /// Endpoint unreachable or the stream broke mid-exchange
    TransportError,
}

/// Response to a request sent over a named channel
#[derive(Debug, Clone)]
pub struct Response {
    /// Message type the request carried
    pub message_type: MessageType,
    /// Transport outcome
    pub status: TransportStatus,
    data: Option<Bytes>,
}

impl Response {
    pub fn new(message_type: MessageType, status: TransportStatus, data: Option<Bytes>) -> Self {
        // An empty reply is "no payload"
        let data = data.filter(|d| !d.is_empty());
        Self {
            message_type,
            status,
            data,
        }
    }

    /// Response for a request that never reached the transport
    pub fn invalid(message_type: MessageType) -> Self {
        Self::new(message_type, TransportStatus::Invalid, None)
    }

    /// Reply payload, if any
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Take ownership of the reply payload
    pub fn into_data(self) -> Option<Bytes> {
        self.data
    }

    /// Acknowledgement code carried by a one-byte reply
    pub fn code(&self) -> ResponseCode {
        match self.data.as_deref() {
            Some([b]) => ResponseCode::from_byte(*b).unwrap_or(ResponseCode::Unknown),
            _ => ResponseCode::Unknown,
        }
    }

    /// Reply interpreted as UTF-8 text
    pub fn as_str(&self) -> Option<&str> {
        self.data.as_deref().and_then(|d| std::str::from_utf8(d).ok())
    }

    pub fn is_success(&self) -> bool {
        self.status == TransportStatus::Success
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.status,
            TransportStatus::SendTimeout | TransportStatus::ReceiveTimeout
        )
    }

    /// Whether the handle behind this response is no longer usable
    pub fn is_invalid(&self) -> bool {
        matches!(
            self.status,
            TransportStatus::Invalid | TransportStatus::TransportError
        )
    }
}
