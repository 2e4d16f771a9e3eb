//! Connection lifecycle state

use std::fmt;

/// Connection lifecycle
///
/// ```text
/// Ready ──connect()──► Connecting ──attempt ok──► Connected
///                        ▲    │                      │
///          connect()     │    │ max attempts         │ send failed
///     Disconnected ──────┘    ▼                      ▼
///                           Closed ◄──close()── Disconnected
/// ```
///
/// `Closed` is terminal and reachable from every state via `close()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Created, `connect()` not called yet
    Ready,
    /// Retry timer running
    Connecting,
    /// Remote handle open
    Connected,
    /// A request failed at the transport level; waiting for `connect()`
    Disconnected,
    /// Terminal
    Closed,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Ready => "ready",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Closed => "closed",
        }
    }

    /// Whether `connect()` moves this state to `Connecting`
    pub fn can_connect(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Ready | ConnectionStatus::Disconnected
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionStatus::Closed
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
