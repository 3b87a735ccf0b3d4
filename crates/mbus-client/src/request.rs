//! Outbound request bookkeeping
//!
//! A request lives in the `requests` queue until its envelope is flushed to
//! the wire, then (for commands) in the `pendings` table until a correlated
//! result arrives or its deadline passes. The kind records which operation
//! the request belongs to, so that its terminal status is synthesized from
//! the right family on timeout or cancellation.

use crate::options::CommandCallback;
use crate::subscription::Subscription;
use mbus_core::clock::{self, Millis};
use mbus_core::{EventMethod, Method};

pub(crate) enum RequestKind {
    /// Session handshake (`create` command)
    Create,
    /// Subscribe command; the entry joins the registry only on ack
    Subscribe { subscription: Subscription },
    /// Unsubscribe command; the entry leaves the registry only on ack
    Unsubscribe { source: String, event: String },
    /// At-least-once publish wrapped in the server `event` command
    Publish { event: EventMethod },
    /// Routine registration
    Register { command: String },
    /// Routine unregistration
    Unregister { command: String },
    /// Generic application command
    Command { callback: Option<CommandCallback> },
    /// At-most-once publish; never tracked in pendings
    Event,
    /// Heartbeat ping; never notified
    Ping,
}

impl RequestKind {
    fn name(&self) -> &'static str {
        match self {
            RequestKind::Create => "create",
            RequestKind::Subscribe { .. } => "subscribe",
            RequestKind::Unsubscribe { .. } => "unsubscribe",
            RequestKind::Publish { .. } => "publish",
            RequestKind::Register { .. } => "register",
            RequestKind::Unregister { .. } => "unregister",
            RequestKind::Command { .. } => "command",
            RequestKind::Event => "event",
            RequestKind::Ping => "ping",
        }
    }
}

pub(crate) struct Request {
    pub kind: RequestKind,
    pub method: Method,
    pub timeout: u64,
    pub created_at: Millis,
}

impl Request {
    pub fn new(kind: RequestKind, method: Method, timeout: u64) -> Self {
        Self {
            kind,
            method,
            timeout,
            created_at: clock::monotonic(),
        }
    }

    pub fn sequence(&self) -> Option<u32> {
        self.method.sequence()
    }

    /// Absolute expiry time
    pub fn deadline(&self) -> Millis {
        self.created_at.wrapping_add(self.timeout)
    }

    pub fn expired(&self, current: Millis) -> bool {
        clock::after(current, self.deadline())
    }

    /// True for request kinds awaiting a correlated result
    pub fn awaits_result(&self) -> bool {
        matches!(self.method, Method::Command(_))
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind.name())
            .field("sequence", &self.sequence())
            .field("timeout", &self.timeout)
            .field("created_at", &self.created_at)
            .finish()
    }
}
