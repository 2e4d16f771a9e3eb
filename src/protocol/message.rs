//! Message tags and acknowledgement codes
//!
//! Every participant on the machine shares these values verbatim.
//!
//! ```text
//! 0x01 - Register                  (payload: subscriber identifier, UTF-8)
//! 0x02 - Deregister                (payload: subscriber identifier, UTF-8)
//! 0x03 - RegistrationConfirmation  (reserved)
//! 0x04 - GetFrame                  (no payload, answered with a serialized frame)
//! 0x05 - ReceiveFrame              (payload: serialized frame)
//! 0x06 - Ping                      (no payload)
//! 0x07 - ReceiveData               (reserved)
//! 0x99 - KillServer                (not honoured)
//! ```

use bytes::Bytes;

/// Request message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Register = 0x01,
    Deregister = 0x02,
    RegistrationConfirmation = 0x03,
    GetFrame = 0x04,
    ReceiveFrame = 0x05,
    Ping = 0x06,
    ReceiveData = 0x07,
    KillServer = 0x99,
}

impl MessageType {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0x01 => Some(MessageType::Register),
            0x02 => Some(MessageType::Deregister),
            0x03 => Some(MessageType::RegistrationConfirmation),
            0x04 => Some(MessageType::GetFrame),
            0x05 => Some(MessageType::ReceiveFrame),
            0x06 => Some(MessageType::Ping),
            0x07 => Some(MessageType::ReceiveData),
            0x99 => Some(MessageType::KillServer),
            _ => None,
        }
    }

    /// Wire value of this tag
    pub fn id(self) -> u32 {
        self as u32
    }
}

/// Single-byte acknowledgement payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// Request accepted, nothing changed
    Ok = 1,
    /// Request accepted and caused a change (e.g. new registration)
    Success = 2,
    /// Receiver cannot serve this request right now
    NotAvailable = 3,
    ConnectionClosed = 4,
    Unknown = 99,
}

impl ResponseCode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(ResponseCode::Ok),
            2 => Some(ResponseCode::Success),
            3 => Some(ResponseCode::NotAvailable),
            4 => Some(ResponseCode::ConnectionClosed),
            99 => Some(ResponseCode::Unknown),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Encode as a one-byte response payload
    pub fn to_bytes(self) -> Bytes {
        Bytes::copy_from_slice(&[self.as_byte()])
    }

    /// Whether the receiver accepted the request
    pub fn is_accepted(self) -> bool {
        matches!(self, ResponseCode::Ok | ResponseCode::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_ids() {
        for ty in [
            MessageType::Register,
            MessageType::Deregister,
            MessageType::RegistrationConfirmation,
            MessageType::GetFrame,
            MessageType::ReceiveFrame,
            MessageType::Ping,
            MessageType::ReceiveData,
            MessageType::KillServer,
        ] {
            assert_eq!(MessageType::from_id(ty.id()), Some(ty));
        }
        assert_eq!(MessageType::KillServer.id(), 0x99);
        assert_eq!(MessageType::from_id(0x42), None);
    }

    #[test]
    fn test_response_code_bytes() {
        assert_eq!(ResponseCode::Ok.to_bytes().as_ref(), &[1]);
        assert_eq!(ResponseCode::Unknown.to_bytes().as_ref(), &[99]);
        assert_eq!(ResponseCode::from_byte(3), Some(ResponseCode::NotAvailable));
        assert_eq!(ResponseCode::from_byte(0), None);
    }

    #[test]
    fn test_response_code_accepted() {
        assert!(ResponseCode::Ok.is_accepted());
        assert!(ResponseCode::Success.is_accepted());
        assert!(!ResponseCode::NotAvailable.is_accepted());
        assert!(!ResponseCode::Unknown.is_accepted());
    }
}
