//! mbus Core
//!
//! Core types, framing, and protocol primitives for the mbus message bus.
//!
//! This crate provides:
//! - Protocol envelope types ([`Method`])
//! - Wire framing: 4-byte big-endian length prefix + UTF-8 JSON ([`frame`])
//! - Monotonic millisecond clock with wraparound-tolerant ordering ([`clock`])
//! - The namespaced identifier constants of the bus protocol

pub mod clock;
pub mod error;
pub mod frame;
pub mod method;

pub use error::{Error, Result};
pub use frame::Framer;
pub use method::{CommandMethod, EventMethod, Method, ResultMethod};

/// Method type tags carried in the envelope `type` key.
pub const METHOD_TYPE_COMMAND: &str = "org.mbus.method.type.command";
pub const METHOD_TYPE_EVENT: &str = "org.mbus.method.type.event";
pub const METHOD_TYPE_RESULT: &str = "org.mbus.method.type.result";

/// Sequence numbers are drawn from [`METHOD_SEQUENCE_START`, `METHOD_SEQUENCE_END`),
/// wrapping back to the start value.
pub const METHOD_SEQUENCE_START: u32 = 1;
pub const METHOD_SEQUENCE_END: u32 = 9999;

/// Reserved event wildcards.
pub const METHOD_EVENT_SOURCE_ALL: &str = "org.mbus.method.event.source.all";
pub const METHOD_EVENT_DESTINATION_ALL: &str = "org.mbus.method.event.destination.all";
pub const METHOD_EVENT_DESTINATION_SUBSCRIBERS: &str =
    "org.mbus.method.event.destination.subscribers";
pub const METHOD_EVENT_IDENTIFIER_ALL: &str = "org.mbus.method.event.identifier.all";

/// The bus server's own identifier.
pub const SERVER_IDENTIFIER: &str = "org.mbus.server";

/// Reserved server command names.
pub const SERVER_COMMAND_CREATE: &str = "org.mbus.server.command.create";
pub const SERVER_COMMAND_EVENT: &str = "org.mbus.server.command.event";
pub const SERVER_COMMAND_CALL: &str = "org.mbus.server.command.call";
pub const SERVER_COMMAND_RESULT: &str = "org.mbus.server.command.result";
pub const SERVER_COMMAND_STATUS: &str = "org.mbus.server.command.status";
pub const SERVER_COMMAND_CLIENTS: &str = "org.mbus.server.command.clients";
pub const SERVER_COMMAND_SUBSCRIBE: &str = "org.mbus.server.command.subscribe";
pub const SERVER_COMMAND_UNSUBSCRIBE: &str = "org.mbus.server.command.unsubscribe";
pub const SERVER_COMMAND_REGISTER: &str = "org.mbus.server.command.register";
pub const SERVER_COMMAND_UNREGISTER: &str = "org.mbus.server.command.unregister";
pub const SERVER_COMMAND_CLOSE: &str = "org.mbus.server.command.close";

/// Reserved server event names.
pub const SERVER_EVENT_CONNECTED: &str = "org.mbus.server.event.connected";
pub const SERVER_EVENT_DISCONNECTED: &str = "org.mbus.server.event.disconnected";
pub const SERVER_EVENT_SUBSCRIBED: &str = "org.mbus.server.event.subscribed";
pub const SERVER_EVENT_UNSUBSCRIBED: &str = "org.mbus.server.event.unsubscribed";
pub const SERVER_EVENT_PING: &str = "org.mbus.server.event.ping";
pub const SERVER_EVENT_PONG: &str = "org.mbus.server.event.pong";
