//! Connection State
//!
//! Lifecycle states of the single supervised feed connection.

use serde::Serialize;

/// State of the feed connection.
///
/// `Errored` is transitional: it is published when a transport error
/// occurs and is always followed by `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket is open.
    #[default]
    Disconnected,
    /// A socket open is in progress.
    Connecting,
    /// The socket is open and the subscription has been sent.
    Connected,
    /// A transport error was observed on the socket.
    Errored,
}

impl ConnectionState {
    /// Get the state name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Errored => "error",
        }
    }

    /// Whether the socket is open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a socket is open or being opened.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connected | Self::Connecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn activity_flags() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Connecting.is_active());
        assert!(!ConnectionState::Errored.is_active());
        assert!(!ConnectionState::Disconnected.is_connected());
    }
}
