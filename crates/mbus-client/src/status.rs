//! Operation status families
//!
//! Every asynchronous operation resolves with exactly one terminal status
//! from its own family. These are protocol outcomes, not errors: they are
//! delivered through the notification callbacks, never returned from the
//! public methods.

use std::fmt;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery strength for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    /// Fire and forget, no confirmation
    #[default]
    AtMostOnce,
    /// Server-acknowledged via a wrapping command
    AtLeastOnce,
    /// Declared by the protocol but not implemented; always rejected
    ExactlyOnce,
}

/// Terminal status of a connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Success,
    InternalError,
    InvalidProtocol,
    ConnectionRefused,
    ServerUnavailable,
    Timeout,
    Canceled,
    InvalidProtocolVersion,
    InvalidIdentifier,
    ServerError,
}

impl ConnectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectStatus::Success => "success",
            ConnectStatus::InternalError => "internal error",
            ConnectStatus::InvalidProtocol => "invalid protocol",
            ConnectStatus::ConnectionRefused => "connection refused",
            ConnectStatus::ServerUnavailable => "server unavailable",
            ConnectStatus::Timeout => "timeout",
            ConnectStatus::Canceled => "canceled",
            ConnectStatus::InvalidProtocolVersion => "invalid protocol version",
            ConnectStatus::InvalidIdentifier => "invalid client identifier",
            ConnectStatus::ServerError => "server error",
        }
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectStatus {
    Success,
    InternalError,
    ConnectionClosed,
    Canceled,
    PingTimeout,
}

impl DisconnectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectStatus::Success => "success",
            DisconnectStatus::InternalError => "internal error",
            DisconnectStatus::ConnectionClosed => "connection closed",
            DisconnectStatus::Canceled => "canceled",
            DisconnectStatus::PingTimeout => "ping timeout",
        }
    }
}

impl fmt::Display for DisconnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! operation_status {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            Success,
            InternalError,
            Timeout,
            Canceled,
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $name::Success => "success",
                    $name::InternalError => "internal error",
                    $name::Timeout => "timeout",
                    $name::Canceled => "canceled",
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

operation_status!(
    /// Terminal status of a publish
    PublishStatus
);
operation_status!(
    /// Terminal status of a subscribe
    SubscribeStatus
);
operation_status!(
    /// Terminal status of an unsubscribe
    UnsubscribeStatus
);
operation_status!(
    /// Terminal status of a routine registration
    RegisterStatus
);
operation_status!(
    /// Terminal status of a routine unregistration
    UnregisterStatus
);
operation_status!(
    /// Terminal status of a generic command
    CommandStatus
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(ConnectStatus::ConnectionRefused.as_str(), "connection refused");
        assert_eq!(DisconnectStatus::PingTimeout.as_str(), "ping timeout");
        assert_eq!(CommandStatus::Canceled.as_str(), "canceled");
        assert_eq!(PublishStatus::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_default_state() {
        assert_eq!(ClientState::default(), ClientState::Disconnected);
    }
}
