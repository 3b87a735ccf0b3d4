//! Client configuration
//!
//! Options are finalized once at construction: every missing or zero value
//! is replaced by its documented default inside [`OptionsBuilder::build`],
//! and the engine never observes a partially-defaulted set.

use crate::error::{ClientError, Result};
use crate::message::{CommandReply, EventMessage};
use crate::status::{
    ConnectStatus, DisconnectStatus, PublishStatus, RegisterStatus, SubscribeStatus,
    UnregisterStatus, UnsubscribeStatus,
};

/// Callback invoked when a connect attempt resolves
pub type ConnectCallback = Box<dyn FnMut(ConnectStatus) + Send>;
/// Callback invoked when the connection ends
pub type DisconnectCallback = Box<dyn FnMut(DisconnectStatus) + Send>;
/// Callback invoked with an incoming event
pub type MessageCallback = Box<dyn FnMut(&EventMessage) + Send>;
/// Callback invoked when a publish resolves
pub type PublishCallback = Box<dyn FnMut(&EventMessage, PublishStatus) + Send>;
/// Callback invoked when a subscribe resolves, with (source, event)
pub type SubscribeCallback = Box<dyn FnMut(&str, &str, SubscribeStatus) + Send>;
/// Callback invoked when an unsubscribe resolves, with (source, event)
pub type UnsubscribeCallback = Box<dyn FnMut(&str, &str, UnsubscribeStatus) + Send>;
/// Callback invoked when a routine registration resolves
pub type RegisteredCallback = Box<dyn FnMut(&str, RegisterStatus) + Send>;
/// Callback invoked when a routine unregistration resolves
pub type UnregisteredCallback = Box<dyn FnMut(&str, UnregisterStatus) + Send>;
/// One-shot callback invoked when a command resolves
pub type CommandCallback = Box<dyn FnOnce(CommandReply, crate::status::CommandStatus) + Send>;
/// Client-wide callback for commands issued without their own callback
pub type ResultCallback = Box<dyn FnMut(&CommandReply, crate::status::CommandStatus) + Send>;

/// Documented defaults, applied at construction time
pub mod defaults {
    pub const SERVER_PROTOCOL: &str = "tcp";
    pub const SERVER_ADDRESS: &str = "127.0.0.1";
    pub const SERVER_PORT: u16 = 8000;

    pub const RUN_TIMEOUT: u64 = 1000;

    pub const CONNECT_TIMEOUT: u64 = 30000;
    pub const CONNECT_INTERVAL: u64 = 0;
    pub const SUBSCRIBE_TIMEOUT: u64 = 30000;
    pub const REGISTER_TIMEOUT: u64 = 30000;
    pub const COMMAND_TIMEOUT: u64 = 30000;
    pub const PUBLISH_TIMEOUT: u64 = 30000;

    pub const PING_INTERVAL: u64 = 180000;
    pub const PING_TIMEOUT: u64 = 5000;
    pub const PING_THRESHOLD: u32 = 2;
}

/// Named callback slots; every slot is optional
#[derive(Default)]
pub(crate) struct Callbacks {
    pub on_connect: Option<ConnectCallback>,
    pub on_disconnect: Option<DisconnectCallback>,
    pub on_message: Option<MessageCallback>,
    pub on_result: Option<ResultCallback>,
    pub on_publish: Option<PublishCallback>,
    pub on_subscribe: Option<SubscribeCallback>,
    pub on_unsubscribe: Option<UnsubscribeCallback>,
    pub on_registered: Option<RegisteredCallback>,
    pub on_unregistered: Option<UnregisteredCallback>,
}

/// Immutable-after-construction client configuration
pub struct Options {
    pub(crate) identifier: Option<String>,
    pub(crate) server_protocol: String,
    pub(crate) server_address: String,
    pub(crate) server_port: u16,
    pub(crate) connect_timeout: u64,
    pub(crate) connect_interval: u64,
    pub(crate) subscribe_timeout: u64,
    pub(crate) register_timeout: u64,
    pub(crate) command_timeout: u64,
    pub(crate) publish_timeout: u64,
    pub(crate) ping_interval: u64,
    pub(crate) ping_timeout: u64,
    pub(crate) ping_threshold: u32,
    pub(crate) callbacks: Callbacks,
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::new()
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("identifier", &self.identifier)
            .field("server_protocol", &self.server_protocol)
            .field("server_address", &self.server_address)
            .field("server_port", &self.server_port)
            .field("connect_timeout", &self.connect_timeout)
            .field("connect_interval", &self.connect_interval)
            .field("subscribe_timeout", &self.subscribe_timeout)
            .field("register_timeout", &self.register_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("publish_timeout", &self.publish_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .field("ping_threshold", &self.ping_threshold)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Options`]
#[derive(Default)]
pub struct OptionsBuilder {
    identifier: Option<String>,
    server_protocol: Option<String>,
    server_address: Option<String>,
    server_port: Option<u16>,
    connect_timeout: Option<u64>,
    connect_interval: Option<u64>,
    subscribe_timeout: Option<u64>,
    register_timeout: Option<u64>,
    command_timeout: Option<u64>,
    publish_timeout: Option<u64>,
    ping_interval: Option<u64>,
    ping_timeout: Option<u64>,
    ping_threshold: Option<u32>,
    callbacks: Callbacks,
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested client identifier; when unset the server assigns one
    pub fn identifier(mut self, identifier: &str) -> Self {
        self.identifier = Some(identifier.to_string());
        self
    }

    pub fn server_protocol(mut self, protocol: &str) -> Self {
        self.server_protocol = Some(protocol.to_string());
        self
    }

    pub fn server_address(mut self, address: &str) -> Self {
        self.server_address = Some(address.to_string());
        self
    }

    pub fn server_port(mut self, port: u16) -> Self {
        self.server_port = Some(port);
        self
    }

    /// Milliseconds to wait for the transport connect plus handshake
    pub fn connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout = Some(ms);
        self
    }

    /// Automatic reconnect interval in milliseconds; zero disables retry
    pub fn connect_interval(mut self, ms: u64) -> Self {
        self.connect_interval = Some(ms);
        self
    }

    pub fn subscribe_timeout(mut self, ms: u64) -> Self {
        self.subscribe_timeout = Some(ms);
        self
    }

    pub fn register_timeout(mut self, ms: u64) -> Self {
        self.register_timeout = Some(ms);
        self
    }

    pub fn command_timeout(mut self, ms: u64) -> Self {
        self.command_timeout = Some(ms);
        self
    }

    pub fn publish_timeout(mut self, ms: u64) -> Self {
        self.publish_timeout = Some(ms);
        self
    }

    /// Requested heartbeat parameters; the server's negotiated values win
    pub fn ping_interval(mut self, ms: u64) -> Self {
        self.ping_interval = Some(ms);
        self
    }

    pub fn ping_timeout(mut self, ms: u64) -> Self {
        self.ping_timeout = Some(ms);
        self
    }

    pub fn ping_threshold(mut self, count: u32) -> Self {
        self.ping_threshold = Some(count);
        self
    }

    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: FnMut(ConnectStatus) + Send + 'static,
    {
        self.callbacks.on_connect = Some(Box::new(callback));
        self
    }

    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: FnMut(DisconnectStatus) + Send + 'static,
    {
        self.callbacks.on_disconnect = Some(Box::new(callback));
        self
    }

    /// Client-wide event callback, used when a matching subscription has
    /// no callback of its own
    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&EventMessage) + Send + 'static,
    {
        self.callbacks.on_message = Some(Box::new(callback));
        self
    }

    /// Client-wide command resolution callback, used by [`command`] calls
    /// that carry no callback of their own
    ///
    /// [`command`]: crate::MbusClient::command
    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&CommandReply, crate::status::CommandStatus) + Send + 'static,
    {
        self.callbacks.on_result = Some(Box::new(callback));
        self
    }

    pub fn on_publish<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&EventMessage, PublishStatus) + Send + 'static,
    {
        self.callbacks.on_publish = Some(Box::new(callback));
        self
    }

    pub fn on_subscribe<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str, &str, SubscribeStatus) + Send + 'static,
    {
        self.callbacks.on_subscribe = Some(Box::new(callback));
        self
    }

    pub fn on_unsubscribe<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str, &str, UnsubscribeStatus) + Send + 'static,
    {
        self.callbacks.on_unsubscribe = Some(Box::new(callback));
        self
    }

    pub fn on_registered<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str, RegisterStatus) + Send + 'static,
    {
        self.callbacks.on_registered = Some(Box::new(callback));
        self
    }

    pub fn on_unregistered<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str, UnregisterStatus) + Send + 'static,
    {
        self.callbacks.on_unregistered = Some(Box::new(callback));
        self
    }

    /// Resolve defaults and finalize
    pub fn build(self) -> Result<Options> {
        fn or_default(value: Option<u64>, default: u64) -> u64 {
            match value {
                Some(v) if v > 0 => v,
                _ => default,
            }
        }

        let server_protocol = self
            .server_protocol
            .unwrap_or_else(|| defaults::SERVER_PROTOCOL.to_string());
        if server_protocol != defaults::SERVER_PROTOCOL {
            return Err(ClientError::InvalidProtocol(server_protocol));
        }

        Ok(Options {
            identifier: self.identifier,
            server_protocol,
            server_address: self
                .server_address
                .unwrap_or_else(|| defaults::SERVER_ADDRESS.to_string()),
            server_port: match self.server_port {
                Some(p) if p > 0 => p,
                _ => defaults::SERVER_PORT,
            },
            connect_timeout: or_default(self.connect_timeout, defaults::CONNECT_TIMEOUT),
            // connect interval keeps zero: zero means no automatic retry
            connect_interval: self.connect_interval.unwrap_or(defaults::CONNECT_INTERVAL),
            subscribe_timeout: or_default(self.subscribe_timeout, defaults::SUBSCRIBE_TIMEOUT),
            register_timeout: or_default(self.register_timeout, defaults::REGISTER_TIMEOUT),
            command_timeout: or_default(self.command_timeout, defaults::COMMAND_TIMEOUT),
            publish_timeout: or_default(self.publish_timeout, defaults::PUBLISH_TIMEOUT),
            ping_interval: or_default(self.ping_interval, defaults::PING_INTERVAL),
            ping_timeout: or_default(self.ping_timeout, defaults::PING_TIMEOUT),
            ping_threshold: match self.ping_threshold {
                Some(t) if t > 0 => t,
                _ => defaults::PING_THRESHOLD,
            },
            callbacks: self.callbacks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolved_at_build() {
        let options = Options::builder().build().unwrap();
        assert_eq!(options.server_protocol, "tcp");
        assert_eq!(options.server_address, "127.0.0.1");
        assert_eq!(options.server_port, 8000);
        assert_eq!(options.connect_timeout, 30000);
        assert_eq!(options.connect_interval, 0);
        assert_eq!(options.command_timeout, 30000);
        assert_eq!(options.ping_interval, 180000);
        assert_eq!(options.ping_timeout, 5000);
        assert_eq!(options.ping_threshold, 2);
        assert!(options.identifier.is_none());
    }

    #[test]
    fn test_zero_timeout_replaced_by_default() {
        let options = Options::builder()
            .connect_timeout(0)
            .command_timeout(0)
            .build()
            .unwrap();
        assert_eq!(options.connect_timeout, 30000);
        assert_eq!(options.command_timeout, 30000);
    }

    #[test]
    fn test_overrides_kept() {
        let options = Options::builder()
            .identifier("client-1")
            .server_address("10.0.0.1")
            .server_port(9000)
            .connect_interval(250)
            .build()
            .unwrap();
        assert_eq!(options.identifier(), Some("client-1"));
        assert_eq!(options.server_address(), "10.0.0.1");
        assert_eq!(options.server_port(), 9000);
        assert_eq!(options.connect_interval, 250);
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        assert!(Options::builder().server_protocol("udp").build().is_err());
    }
}
