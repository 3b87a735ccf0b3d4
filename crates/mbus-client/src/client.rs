//! mbus client engine
//!
//! The client is a cooperative, single-owner protocol engine: the embedding
//! application drives all progress by calling [`MbusClient::run`] in a loop.
//! Public methods only enqueue intents; every send, receive, deadline, and
//! state transition happens inside one `run` iteration. The only suspension
//! point is the bounded readiness wait, which merges the transport, the
//! external wake handle, and the nearest deadline of every timeout regime.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use mbus_core::clock::{self, Millis};
use mbus_core::{
    frame, CommandMethod, EventMethod, Framer, Method, ResultMethod, METHOD_EVENT_DESTINATION_SUBSCRIBERS,
    METHOD_EVENT_SOURCE_ALL, METHOD_SEQUENCE_END, METHOD_SEQUENCE_START, SERVER_COMMAND_CREATE,
    SERVER_COMMAND_EVENT, SERVER_COMMAND_REGISTER, SERVER_COMMAND_SUBSCRIBE,
    SERVER_COMMAND_UNREGISTER, SERVER_COMMAND_UNSUBSCRIBE, SERVER_EVENT_PING, SERVER_EVENT_PONG,
    SERVER_IDENTIFIER,
};

use crate::error::{ClientError, Result};
use crate::message::{CommandReply, EventMessage};
use crate::options::{defaults, MessageCallback, Options};
use crate::request::{Request, RequestKind};
use crate::status::{
    ClientState, CommandStatus, ConnectStatus, DisconnectStatus, PublishStatus, Qos,
    RegisterStatus, SubscribeStatus, UnregisterStatus, UnsubscribeStatus,
};
use crate::subscription::{Subscription, SubscriptionRegistry};

type ConnectFuture = BoxFuture<'static, io::Result<TcpStream>>;

/// Cross-thread handle that unblocks the readiness wait inside `run`
#[derive(Clone)]
pub struct ClientWaker {
    notify: Arc<Notify>,
}

impl ClientWaker {
    /// Wake the run loop so it observes pending state changes promptly
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

/// Outcome of the bounded readiness wait
enum Wait {
    Woken,
    Connected(io::Result<TcpStream>),
    Ready(io::Result<tokio::io::Ready>),
    TimedOut,
}

enum ReadOutcome {
    Progress,
    Closed,
    Failed(io::Error),
}

/// Terminal reason for a request that never received its result
#[derive(Clone, Copy)]
enum Fail {
    Timeout,
    Canceled,
}

/// Server reply to the `create` handshake command
#[derive(Deserialize)]
struct HandshakeReply {
    identifier: String,
    #[serde(default)]
    ping: HandshakePing,
    #[serde(default)]
    compression: Option<String>,
}

#[derive(Deserialize, Default)]
struct HandshakePing {
    #[serde(default)]
    interval: u64,
    #[serde(default)]
    timeout: u64,
    #[serde(default)]
    threshold: u32,
}

/// An mbus client
pub struct MbusClient {
    options: Options,
    state: ClientState,

    socket: Option<TcpStream>,
    connect_future: Option<ConnectFuture>,
    connect_tsms: Millis,

    /// Queued requests, not yet written to the wire
    requests: VecDeque<Request>,
    /// Written command requests awaiting a correlated result
    pendings: VecDeque<Request>,

    subscriptions: SubscriptionRegistry,
    /// Registered routine commands (added/removed on server ack only)
    routines: Vec<String>,

    framer: Framer,
    outgoing: BytesMut,

    /// Session identifier assigned by the server
    identifier: Option<String>,
    /// Server-negotiated compression for the session
    compression: Option<String>,

    // Heartbeat state; all server-negotiated, zero while disconnected
    ping_interval: u64,
    ping_timeout: u64,
    ping_threshold: u32,
    ping_send_tsms: Millis,
    pong_recv_tsms: Millis,
    ping_wait_pong: bool,
    pong_missed_count: u32,

    sequence: u32,
    waker: Arc<Notify>,
}

impl MbusClient {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            state: ClientState::Disconnected,
            socket: None,
            connect_future: None,
            connect_tsms: 0,
            requests: VecDeque::new(),
            pendings: VecDeque::new(),
            subscriptions: SubscriptionRegistry::default(),
            routines: Vec::new(),
            framer: Framer::new(),
            outgoing: BytesMut::new(),
            identifier: None,
            compression: None,
            ping_interval: 0,
            ping_timeout: 0,
            ping_threshold: 0,
            ping_send_tsms: 0,
            pong_recv_tsms: 0,
            ping_wait_pong: false,
            pong_missed_count: 0,
            sequence: METHOD_SEQUENCE_START,
            waker: Arc::new(Notify::new()),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Session identifier assigned by the server, while connected
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// True while requests, pendings, or either byte buffer are non-empty
    pub fn has_pending(&self) -> bool {
        !self.requests.is_empty()
            || !self.pendings.is_empty()
            || !self.framer.is_empty()
            || !self.outgoing.is_empty()
    }

    /// Handle that unblocks `run` from another thread or task
    pub fn waker(&self) -> ClientWaker {
        ClientWaker {
            notify: Arc::clone(&self.waker),
        }
    }

    /// Request a connect; the attempt itself runs inside `run`
    pub fn connect(&mut self) {
        if self.state != ClientState::Connected {
            self.state = ClientState::Connecting;
            self.waker.notify_one();
        }
    }

    /// Request a disconnect; teardown runs inside `run`
    pub fn disconnect(&mut self) {
        if self.state != ClientState::Disconnected {
            self.state = ClientState::Disconnecting;
            self.waker.notify_one();
        }
    }

    /// Issue a correlated command, resolved through the client-wide
    /// `on_result` slot
    pub fn command(
        &mut self,
        destination: &str,
        identifier: &str,
        payload: Value,
        timeout: Option<u64>,
    ) -> Result<()> {
        let timeout = resolve_timeout(timeout, self.options.command_timeout);
        self.enqueue_command(
            RequestKind::Command { callback: None },
            destination,
            identifier,
            payload,
            timeout,
        )
    }

    /// Issue a correlated command with its own callback
    ///
    /// The callback fires exactly once: with the correlated result on
    /// success, or with a Timeout/Canceled status and no result.
    pub fn command_callback<F>(
        &mut self,
        destination: &str,
        identifier: &str,
        payload: Value,
        timeout: Option<u64>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(CommandReply, CommandStatus) + Send + 'static,
    {
        let timeout = resolve_timeout(timeout, self.options.command_timeout);
        self.enqueue_command(
            RequestKind::Command {
                callback: Some(Box::new(callback)),
            },
            destination,
            identifier,
            payload,
            timeout,
        )
    }

    /// Subscribe to `event` from any source, dispatching to `on_message`
    pub fn subscribe(&mut self, event: &str) -> Result<()> {
        self.subscribe_with(event, None, None, None)
    }

    /// Subscribe with a dedicated callback for matching events
    pub fn subscribe_callback<F>(&mut self, event: &str, callback: F) -> Result<()>
    where
        F: FnMut(&EventMessage) + Send + 'static,
    {
        self.subscribe_with(event, None, Some(Box::new(callback)), None)
    }

    /// Subscribe to `event` from `source` (default: any source)
    ///
    /// The local entry joins the registry only once the server acknowledges
    /// the subscribe command; a pending subscribe never matches events.
    pub fn subscribe_with(
        &mut self,
        event: &str,
        source: Option<&str>,
        callback: Option<MessageCallback>,
        timeout: Option<u64>,
    ) -> Result<()> {
        if self.state != ClientState::Connected {
            return Err(ClientError::InvalidState(self.state, ClientState::Connected));
        }
        if event.is_empty() {
            return Err(ClientError::MissingArgument("event"));
        }
        let source = source.unwrap_or(METHOD_EVENT_SOURCE_ALL);
        if self.subscriptions.contains(source, event) || self.subscribe_in_flight(source, event) {
            return Err(ClientError::DuplicateSubscription {
                from: source.to_string(),
                event: event.to_string(),
            });
        }
        let timeout = resolve_timeout(timeout, self.options.subscribe_timeout);
        let subscription = Subscription::new(source.to_string(), event.to_string(), callback);
        let payload = json!({ "source": source, "event": event });
        self.enqueue_command(
            RequestKind::Subscribe { subscription },
            SERVER_IDENTIFIER,
            SERVER_COMMAND_SUBSCRIBE,
            payload,
            timeout,
        )
    }

    /// Unsubscribe from `event` (any-source wildcard)
    pub fn unsubscribe(&mut self, event: &str) -> Result<()> {
        self.unsubscribe_with(event, None, None)
    }

    /// Unsubscribe; the local entry leaves the registry only on server ack
    pub fn unsubscribe_with(
        &mut self,
        event: &str,
        source: Option<&str>,
        timeout: Option<u64>,
    ) -> Result<()> {
        if self.state != ClientState::Connected {
            return Err(ClientError::InvalidState(self.state, ClientState::Connected));
        }
        if event.is_empty() {
            return Err(ClientError::MissingArgument("event"));
        }
        let source = source.unwrap_or(METHOD_EVENT_SOURCE_ALL);
        if !self.subscriptions.contains(source, event) {
            return Err(ClientError::UnknownSubscription {
                from: source.to_string(),
                event: event.to_string(),
            });
        }
        let timeout = resolve_timeout(timeout, self.options.subscribe_timeout);
        let payload = json!({ "source": source, "event": event });
        self.enqueue_command(
            RequestKind::Unsubscribe {
                source: source.to_string(),
                event: event.to_string(),
            },
            SERVER_IDENTIFIER,
            SERVER_COMMAND_UNSUBSCRIBE,
            payload,
            timeout,
        )
    }

    /// Publish `event` to all subscribers, at-most-once
    pub fn publish(&mut self, event: &str, payload: Value) -> Result<()> {
        self.publish_with(event, payload, Qos::AtMostOnce, None, None)
    }

    /// Publish `event` to a specific destination, at-most-once
    pub fn publish_to(&mut self, destination: &str, event: &str, payload: Value) -> Result<()> {
        self.publish_with(event, payload, Qos::AtMostOnce, Some(destination), None)
    }

    /// Publish with explicit delivery strength
    ///
    /// At-most-once resolves Success as soon as the event is handed to the
    /// flush path. At-least-once wraps the event in the server `event`
    /// command and resolves when that command's result arrives.
    /// Exactly-once is not implemented and is rejected.
    pub fn publish_with(
        &mut self,
        event: &str,
        payload: Value,
        qos: Qos,
        destination: Option<&str>,
        timeout: Option<u64>,
    ) -> Result<()> {
        if self.state != ClientState::Connected {
            return Err(ClientError::InvalidState(self.state, ClientState::Connected));
        }
        if event.is_empty() {
            return Err(ClientError::MissingArgument("event"));
        }
        let destination = destination.unwrap_or(METHOD_EVENT_DESTINATION_SUBSCRIBERS);
        let timeout = resolve_timeout(timeout, self.options.publish_timeout);
        match qos {
            Qos::AtMostOnce => {
                let sequence = self.next_sequence();
                let method = Method::Event(EventMethod {
                    source: None,
                    destination: Some(destination.to_string()),
                    identifier: event.to_string(),
                    sequence: Some(sequence),
                    payload,
                    timeout: Some(timeout),
                });
                self.requests
                    .push_back(Request::new(RequestKind::Event, method, timeout));
                Ok(())
            }
            Qos::AtLeastOnce => {
                let event_method = EventMethod {
                    source: None,
                    destination: Some(destination.to_string()),
                    identifier: event.to_string(),
                    sequence: None,
                    payload: payload.clone(),
                    timeout: Some(timeout),
                };
                let command_payload = json!({
                    "destination": destination,
                    "identifier": event,
                    "payload": payload,
                });
                self.enqueue_command(
                    RequestKind::Publish {
                        event: event_method,
                    },
                    SERVER_IDENTIFIER,
                    SERVER_COMMAND_EVENT,
                    command_payload,
                    timeout,
                )
            }
            Qos::ExactlyOnce => Err(ClientError::UnsupportedQos(Qos::ExactlyOnce)),
        }
    }

    /// Register a callable command on the bus
    ///
    /// The payload shape mirrors subscribe; the bus side of routine
    /// invocation is unverified (no known server exercises it).
    pub fn register(&mut self, command: &str) -> Result<()> {
        self.register_with(command, None)
    }

    pub fn register_with(&mut self, command: &str, timeout: Option<u64>) -> Result<()> {
        if self.state != ClientState::Connected {
            return Err(ClientError::InvalidState(self.state, ClientState::Connected));
        }
        if command.is_empty() {
            return Err(ClientError::MissingArgument("command"));
        }
        if self.routines.iter().any(|r| r == command) || self.register_in_flight(command) {
            return Err(ClientError::DuplicateRoutine(command.to_string()));
        }
        let timeout = resolve_timeout(timeout, self.options.register_timeout);
        let payload = json!({ "command": command });
        self.enqueue_command(
            RequestKind::Register {
                command: command.to_string(),
            },
            SERVER_IDENTIFIER,
            SERVER_COMMAND_REGISTER,
            payload,
            timeout,
        )
    }

    /// Unregister a previously registered command
    pub fn unregister(&mut self, command: &str) -> Result<()> {
        self.unregister_with(command, None)
    }

    pub fn unregister_with(&mut self, command: &str, timeout: Option<u64>) -> Result<()> {
        if self.state != ClientState::Connected {
            return Err(ClientError::InvalidState(self.state, ClientState::Connected));
        }
        if command.is_empty() {
            return Err(ClientError::MissingArgument("command"));
        }
        if !self.routines.iter().any(|r| r == command) {
            return Err(ClientError::UnknownRoutine(command.to_string()));
        }
        let timeout = resolve_timeout(timeout, self.options.register_timeout);
        let payload = json!({ "command": command });
        self.enqueue_command(
            RequestKind::Unregister {
                command: command.to_string(),
            },
            SERVER_IDENTIFIER,
            SERVER_COMMAND_UNREGISTER,
            payload,
            timeout,
        )
    }

    /// Milliseconds until the nearest internal deadline
    ///
    /// Merges the connect/handshake deadline, every request deadline, and
    /// the next heartbeat event, capped at the run baseline.
    pub fn run_timeout(&self) -> u64 {
        let current = clock::monotonic();
        let mut timeout = defaults::RUN_TIMEOUT;
        match self.state {
            ClientState::Connecting => {
                if self.socket.is_none() && self.connect_future.is_none() {
                    timeout = timeout.min(clock::until(
                        current,
                        self.connect_tsms + self.options.connect_interval,
                    ));
                } else if self.connect_future.is_some() {
                    timeout = timeout.min(clock::until(
                        current,
                        self.connect_tsms + self.options.connect_timeout,
                    ));
                }
            }
            ClientState::Connected => {
                if self.ping_interval > 0 {
                    timeout = timeout.min(clock::until(
                        current,
                        self.ping_send_tsms + self.ping_interval,
                    ));
                    if self.ping_wait_pong {
                        timeout = timeout.min(clock::until(
                            current,
                            self.ping_send_tsms + self.ping_timeout,
                        ));
                    }
                }
            }
            ClientState::Disconnecting => return 0,
            ClientState::Disconnected => {
                if self.options.connect_interval > 0 {
                    timeout = timeout.min(clock::until(
                        current,
                        self.connect_tsms + self.options.connect_interval,
                    ));
                }
            }
        }
        for request in self.requests.iter().chain(self.pendings.iter()) {
            timeout = timeout.min(clock::until(current, request.deadline()));
        }
        timeout
    }

    /// Perform exactly one run-loop iteration
    ///
    /// Advances automatic state transitions, waits for readiness or the
    /// nearest deadline (bounded by the caller-supplied `timeout`, in
    /// milliseconds), services the transport, dispatches complete frames,
    /// expires requests, and flushes the outbound queue. Protocol failures
    /// resolve through the notification callbacks, never through the
    /// returned `Result`.
    pub async fn run(&mut self, timeout: Option<u64>) -> Result<()> {
        match self.state {
            ClientState::Connecting => {
                if self.socket.is_none() && self.connect_future.is_none() {
                    let current = clock::monotonic();
                    if self.options.connect_interval == 0
                        || clock::after(current, self.connect_tsms + self.options.connect_interval)
                    {
                        self.connect_tsms = current;
                        self.start_connect();
                    }
                }
            }
            ClientState::Connected => {}
            ClientState::Disconnecting => {
                self.reset();
                self.notify_disconnect(DisconnectStatus::Success);
                self.state = ClientState::Disconnected;
                return Ok(());
            }
            ClientState::Disconnected => {
                if self.options.connect_interval > 0 {
                    self.state = ClientState::Connecting;
                    return Ok(());
                }
            }
        }

        let mut wait = self.run_timeout();
        if let Some(limit) = timeout {
            wait = wait.min(limit);
        }

        match self.wait_readiness(Duration::from_millis(wait)).await {
            Wait::Woken | Wait::TimedOut => {}
            Wait::Connected(result) => {
                self.connect_future = None;
                match result {
                    Ok(stream) => {
                        debug!(
                            address = %self.options.server_address,
                            port = self.options.server_port,
                            "transport connected"
                        );
                        self.socket = Some(stream);
                        self.send_create_request()?;
                    }
                    Err(error) => {
                        let status = connect_error_status(&error);
                        warn!(%error, status = status.as_str(), "connect failed");
                        self.notify_connect(status);
                        self.reset();
                        self.state = self.retry_state();
                        return Ok(());
                    }
                }
            }
            Wait::Ready(Err(error)) => {
                error!(%error, "readiness wait failed");
                self.fail_connection(DisconnectStatus::InternalError);
                return Ok(());
            }
            Wait::Ready(Ok(ready)) => {
                if ready.is_readable() {
                    match self.service_read() {
                        ReadOutcome::Progress => {}
                        ReadOutcome::Closed => {
                            info!("connection closed by server");
                            self.fail_connection(DisconnectStatus::ConnectionClosed);
                            return Ok(());
                        }
                        ReadOutcome::Failed(error) => {
                            error!(%error, "read failed");
                            self.fail_connection(DisconnectStatus::InternalError);
                            return Ok(());
                        }
                    }
                }
                if ready.is_writable() {
                    if let Err(error) = self.service_write() {
                        error!(%error, "write failed");
                        self.fail_connection(DisconnectStatus::InternalError);
                        return Ok(());
                    }
                }
            }
        }

        // Drain complete frames; a malformed or unexpected frame is fatal
        loop {
            match self.framer.next() {
                Ok(Some(Method::Result(result))) => self.handle_result(result),
                Ok(Some(Method::Event(event))) => self.handle_event(event),
                Ok(Some(Method::Command(command))) => {
                    error!(identifier = %command.identifier, "unexpected command frame");
                    self.fail_connection(DisconnectStatus::InternalError);
                    return Ok(());
                }
                Ok(None) => break,
                Err(error) => {
                    error!(%error, "protocol error");
                    self.fail_connection(DisconnectStatus::InternalError);
                    return Ok(());
                }
            }
        }

        let current = clock::monotonic();

        // Transport connect deadline
        if self.state == ClientState::Connecting
            && self.connect_future.is_some()
            && clock::after(current, self.connect_tsms + self.options.connect_timeout)
        {
            warn!("connect timed out");
            self.notify_connect(ConnectStatus::Timeout);
            self.reset();
            self.state = self.retry_state();
            return Ok(());
        }

        // Heartbeat
        if self.state == ClientState::Connected && self.ping_interval > 0 {
            if clock::after(current, self.ping_send_tsms + self.ping_interval) {
                self.ping_send_tsms = current;
                self.pong_recv_tsms = 0;
                self.ping_wait_pong = true;
                self.enqueue_ping();
            }
            if self.ping_wait_pong
                && self.ping_send_tsms != 0
                && self.pong_recv_tsms == 0
                && clock::after(current, self.ping_send_tsms + self.ping_timeout)
            {
                self.ping_wait_pong = false;
                self.pong_missed_count += 1;
                warn!(
                    missed = self.pong_missed_count,
                    threshold = self.ping_threshold,
                    "pong missed"
                );
            }
            if self.pong_missed_count > self.ping_threshold {
                warn!("missed too many pongs, disconnecting");
                self.fail_connection(DisconnectStatus::PingTimeout);
                return Ok(());
            }
        }

        // Expire requests whose deadline has passed
        let mut expired = Vec::new();
        let mut index = 0;
        while index < self.requests.len() {
            if self.requests[index].expired(current) {
                if let Some(request) = self.requests.remove(index) {
                    expired.push(request);
                }
            } else {
                index += 1;
            }
        }
        index = 0;
        while index < self.pendings.len() {
            if self.pendings[index].expired(current) {
                if let Some(request) = self.pendings.remove(index) {
                    expired.push(request);
                }
            } else {
                index += 1;
            }
        }
        let mut handshake_expired = false;
        for request in expired {
            debug!(request = ?request, "request timed out");
            if matches!(request.kind, RequestKind::Create) {
                handshake_expired = true;
            }
            self.fail_request(request, Fail::Timeout);
        }
        if handshake_expired {
            self.reset();
            self.state = self.retry_state();
            return Ok(());
        }

        self.flush_requests()
    }

    // One non-blocking connect attempt; resolution is observed in `run`
    fn start_connect(&mut self) {
        let address = (
            self.options.server_address.clone(),
            self.options.server_port,
        );
        debug!(address = %address.0, port = address.1, "connecting");
        self.connect_future = Some(Box::pin(TcpStream::connect(address)));
    }

    async fn wait_readiness(&mut self, wait: Duration) -> Wait {
        let Self {
            waker,
            connect_future,
            socket,
            outgoing,
            ..
        } = self;
        let connecting = connect_future.is_some();
        let has_socket = socket.is_some();
        let interest = if outgoing.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };

        tokio::select! {
            _ = waker.notified() => Wait::Woken,
            result = async {
                match connect_future.as_mut() {
                    Some(future) => future.await,
                    None => std::future::pending().await,
                }
            }, if connecting => Wait::Connected(result),
            ready = async {
                match socket.as_ref() {
                    Some(stream) => stream.ready(interest).await,
                    None => std::future::pending().await,
                }
            }, if has_socket => Wait::Ready(ready),
            _ = tokio::time::sleep(wait) => Wait::TimedOut,
        }
    }

    fn service_read(&mut self) -> ReadOutcome {
        let Some(socket) = self.socket.as_ref() else {
            return ReadOutcome::Progress;
        };
        let mut buffer = [0u8; 4096];
        loop {
            match socket.try_read(&mut buffer) {
                Ok(0) => return ReadOutcome::Closed,
                Ok(read) => self.framer.extend(&buffer[..read]),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => return ReadOutcome::Failed(error),
            }
        }
        ReadOutcome::Progress
    }

    fn service_write(&mut self) -> io::Result<()> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(());
        };
        while !self.outgoing.is_empty() {
            match socket.try_write(&self.outgoing) {
                Ok(written) => self.outgoing.advance(written),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    // Move queued requests onto the wire buffer; commands become pending
    fn flush_requests(&mut self) -> Result<()> {
        while let Some(request) = self.requests.pop_front() {
            let encoded = frame::encode(&request.method)?;
            self.outgoing.extend_from_slice(&encoded);
            match request.kind {
                RequestKind::Event => {
                    if let Method::Event(event) = request.method {
                        let message = EventMessage::new(event);
                        self.notify_publish(&message, PublishStatus::Success);
                    }
                }
                RequestKind::Ping => {}
                _ => self.pendings.push_back(request),
            }
        }
        Ok(())
    }

    fn send_create_request(&mut self) -> Result<()> {
        let mut payload = json!({});
        if let Some(identifier) = &self.options.identifier {
            payload["identifier"] = json!(identifier);
        }
        if self.options.ping_interval > 0 {
            payload["ping"] = json!({
                "interval": self.options.ping_interval,
                "timeout": self.options.ping_timeout,
                "threshold": self.options.ping_threshold,
            });
        }
        payload["compressions"] = json!(["none"]);
        // The handshake command is bounded by the connect timeout
        self.enqueue_command(
            RequestKind::Create,
            SERVER_IDENTIFIER,
            SERVER_COMMAND_CREATE,
            payload,
            self.options.connect_timeout,
        )
    }

    fn enqueue_command(
        &mut self,
        kind: RequestKind,
        destination: &str,
        identifier: &str,
        payload: Value,
        timeout: u64,
    ) -> Result<()> {
        if destination.is_empty() {
            return Err(ClientError::MissingArgument("destination"));
        }
        if identifier.is_empty() {
            return Err(ClientError::MissingArgument("identifier"));
        }
        if identifier == SERVER_COMMAND_CREATE {
            if self.state != ClientState::Connecting {
                return Err(ClientError::InvalidState(self.state, ClientState::Connecting));
            }
        } else if self.state != ClientState::Connected {
            return Err(ClientError::InvalidState(self.state, ClientState::Connected));
        }
        let sequence = self.next_sequence();
        let method = Method::Command(CommandMethod {
            destination: destination.to_string(),
            identifier: identifier.to_string(),
            sequence,
            payload,
            timeout: Some(timeout),
        });
        debug!(destination, identifier, sequence, "queueing command");
        self.requests.push_back(Request::new(kind, method, timeout));
        Ok(())
    }

    fn enqueue_ping(&mut self) {
        let sequence = self.next_sequence();
        let method = Method::Event(EventMethod {
            source: None,
            destination: Some(SERVER_IDENTIFIER.to_string()),
            identifier: SERVER_EVENT_PING.to_string(),
            sequence: Some(sequence),
            payload: Value::Null,
            timeout: Some(self.options.publish_timeout),
        });
        debug!(sequence, "queueing ping");
        self.requests.push_back(Request::new(
            RequestKind::Ping,
            method,
            self.options.publish_timeout,
        ));
    }

    // Next sequence in [START, END), skipping values still held by an
    // outstanding command request
    fn next_sequence(&mut self) -> u32 {
        loop {
            let sequence = self.sequence;
            self.sequence += 1;
            if self.sequence >= METHOD_SEQUENCE_END {
                self.sequence = METHOD_SEQUENCE_START;
            }
            let taken = self
                .requests
                .iter()
                .chain(self.pendings.iter())
                .any(|r| r.awaits_result() && r.sequence() == Some(sequence));
            if !taken {
                return sequence;
            }
        }
    }

    fn subscribe_in_flight(&self, source: &str, event: &str) -> bool {
        self.requests.iter().chain(self.pendings.iter()).any(|r| {
            matches!(&r.kind, RequestKind::Subscribe { subscription }
                if subscription.source() == source && subscription.identifier() == event)
        })
    }

    fn register_in_flight(&self, command: &str) -> bool {
        self.requests.iter().chain(self.pendings.iter()).any(|r| {
            matches!(&r.kind, RequestKind::Register { command: c } if c == command)
        })
    }

    fn retry_state(&self) -> ClientState {
        if self.options.connect_interval > 0 {
            ClientState::Connecting
        } else {
            ClientState::Disconnected
        }
    }

    // Shared teardown for transport close, protocol error, and heartbeat
    // failure: notify, cancel everything once, drop the session
    fn fail_connection(&mut self, status: DisconnectStatus) {
        self.notify_disconnect(status);
        self.reset();
        self.state = ClientState::Disconnected;
    }

    fn handle_result(&mut self, result: ResultMethod) {
        let index = self
            .pendings
            .iter()
            .position(|p| p.sequence() == Some(result.sequence));
        let Some(index) = index else {
            // Protocol desync; non-fatal
            debug!(sequence = result.sequence, "result for unknown sequence, dropping");
            return;
        };
        debug_assert_eq!(
            self.pendings
                .iter()
                .filter(|p| p.sequence() == Some(result.sequence))
                .count(),
            1,
            "sequence must be unique among pendings"
        );
        let Some(request) = self.pendings.remove(index) else {
            return;
        };
        let Request { kind, method, .. } = request;
        match kind {
            RequestKind::Create => self.finish_handshake(result),
            RequestKind::Subscribe { subscription } => {
                let source = subscription.source().to_string();
                let event = subscription.identifier().to_string();
                let status = if result.status == 0 {
                    if self.subscriptions.insert(subscription) {
                        SubscribeStatus::Success
                    } else {
                        SubscribeStatus::InternalError
                    }
                } else {
                    SubscribeStatus::InternalError
                };
                debug!(%source, %event, status = status.as_str(), "subscribe resolved");
                self.notify_subscribe(&source, &event, status);
            }
            RequestKind::Unsubscribe { source, event } => {
                let status = if result.status == 0 {
                    self.subscriptions.remove(&source, &event);
                    UnsubscribeStatus::Success
                } else {
                    UnsubscribeStatus::InternalError
                };
                debug!(%source, %event, status = status.as_str(), "unsubscribe resolved");
                self.notify_unsubscribe(&source, &event, status);
            }
            RequestKind::Publish { event } => {
                let status = if result.status == 0 {
                    PublishStatus::Success
                } else {
                    PublishStatus::InternalError
                };
                let message = EventMessage::new(event);
                self.notify_publish(&message, status);
            }
            RequestKind::Register { command } => {
                let status = if result.status == 0 {
                    self.routines.push(command.clone());
                    RegisterStatus::Success
                } else {
                    RegisterStatus::InternalError
                };
                self.notify_registered(&command, status);
            }
            RequestKind::Unregister { command } => {
                let status = if result.status == 0 {
                    self.routines.retain(|r| r != &command);
                    UnregisterStatus::Success
                } else {
                    UnregisterStatus::InternalError
                };
                self.notify_unregistered(&command, status);
            }
            RequestKind::Command { callback } => {
                if let Method::Command(request) = method {
                    let reply = CommandReply::new(request, Some(result));
                    match callback {
                        Some(callback) => callback(reply, CommandStatus::Success),
                        None => self.notify_result(&reply, CommandStatus::Success),
                    }
                }
            }
            // Events and pings are never pending
            RequestKind::Event | RequestKind::Ping => {}
        }
    }

    fn finish_handshake(&mut self, result: ResultMethod) {
        if result.status != 0 {
            warn!(status = result.status, "handshake refused by server");
            self.notify_connect(ConnectStatus::ServerError);
            self.reset();
            self.state = ClientState::Disconnected;
            return;
        }
        let reply: HandshakeReply = match serde_json::from_value(result.payload) {
            Ok(reply) => reply,
            Err(error) => {
                warn!(%error, "invalid handshake payload");
                self.notify_connect(ConnectStatus::ServerError);
                self.reset();
                self.state = ClientState::Disconnected;
                return;
            }
        };
        if reply.identifier.is_empty() {
            warn!("handshake payload carries no identifier");
            self.notify_connect(ConnectStatus::InvalidIdentifier);
            self.reset();
            self.state = ClientState::Disconnected;
            return;
        }
        // Server-negotiated heartbeat is authoritative; interval 0 disables
        self.ping_interval = reply.ping.interval;
        self.ping_timeout = reply.ping.timeout;
        self.ping_threshold = reply.ping.threshold;
        self.ping_send_tsms = clock::monotonic();
        self.compression = reply.compression;
        info!(
            identifier = %reply.identifier,
            ping_interval = self.ping_interval,
            "connected"
        );
        self.identifier = Some(reply.identifier);
        self.state = ClientState::Connected;
        self.notify_connect(ConnectStatus::Success);
    }

    fn handle_event(&mut self, event: EventMethod) {
        let Some(source) = event.source.clone() else {
            warn!(identifier = %event.identifier, "event without source, dropping");
            return;
        };
        if source == SERVER_IDENTIFIER && event.identifier == SERVER_EVENT_PONG {
            // Pong resets the missed counter in any heartbeat phase
            self.ping_wait_pong = false;
            self.pong_missed_count = 0;
            self.pong_recv_tsms = clock::monotonic();
            return;
        }
        let message = EventMessage::new(event);
        if let Some(subscription) = self.subscriptions.find_match(&source, message.identifier()) {
            if let Some(callback) = subscription.callback_mut() {
                callback(&message);
                return;
            }
        }
        if let Some(callback) = self.options.callbacks.on_message.as_mut() {
            callback(&message);
        }
    }

    // Deliver the terminal status a request never got from the wire
    fn fail_request(&mut self, request: Request, fail: Fail) {
        let Request { kind, method, .. } = request;
        match kind {
            RequestKind::Create => {
                let status = match fail {
                    Fail::Timeout => ConnectStatus::Timeout,
                    Fail::Canceled => ConnectStatus::Canceled,
                };
                self.notify_connect(status);
            }
            RequestKind::Subscribe { subscription } => {
                let status = match fail {
                    Fail::Timeout => SubscribeStatus::Timeout,
                    Fail::Canceled => SubscribeStatus::Canceled,
                };
                self.notify_subscribe(subscription.source(), subscription.identifier(), status);
            }
            RequestKind::Unsubscribe { source, event } => {
                let status = match fail {
                    Fail::Timeout => UnsubscribeStatus::Timeout,
                    Fail::Canceled => UnsubscribeStatus::Canceled,
                };
                self.notify_unsubscribe(&source, &event, status);
            }
            RequestKind::Publish { event } => {
                let status = match fail {
                    Fail::Timeout => PublishStatus::Timeout,
                    Fail::Canceled => PublishStatus::Canceled,
                };
                let message = EventMessage::new(event);
                self.notify_publish(&message, status);
            }
            RequestKind::Register { command } => {
                let status = match fail {
                    Fail::Timeout => RegisterStatus::Timeout,
                    Fail::Canceled => RegisterStatus::Canceled,
                };
                self.notify_registered(&command, status);
            }
            RequestKind::Unregister { command } => {
                let status = match fail {
                    Fail::Timeout => UnregisterStatus::Timeout,
                    Fail::Canceled => UnregisterStatus::Canceled,
                };
                self.notify_unregistered(&command, status);
            }
            RequestKind::Command { callback } => {
                let status = match fail {
                    Fail::Timeout => CommandStatus::Timeout,
                    Fail::Canceled => CommandStatus::Canceled,
                };
                if let Method::Command(request) = method {
                    let reply = CommandReply::new(request, None);
                    match callback {
                        Some(callback) => callback(reply, status),
                        None => self.notify_result(&reply, status),
                    }
                }
            }
            RequestKind::Event => {
                let status = match fail {
                    Fail::Timeout => PublishStatus::Timeout,
                    Fail::Canceled => PublishStatus::Canceled,
                };
                if let Method::Event(event) = method {
                    let message = EventMessage::new(event);
                    self.notify_publish(&message, status);
                }
            }
            RequestKind::Ping => {}
        }
    }

    // The single teardown path: every outstanding item is canceled exactly
    // once, then all session state returns to its initial value
    fn reset(&mut self) {
        self.socket = None;
        self.connect_future = None;
        self.framer.clear();
        self.outgoing.clear();

        let requests: Vec<Request> = self.requests.drain(..).collect();
        for request in requests {
            self.fail_request(request, Fail::Canceled);
        }
        let pendings: Vec<Request> = self.pendings.drain(..).collect();
        for pending in pendings {
            self.fail_request(pending, Fail::Canceled);
        }

        for command in std::mem::take(&mut self.routines) {
            self.notify_unregistered(&command, UnregisterStatus::Canceled);
        }
        for subscription in self.subscriptions.drain() {
            self.notify_unsubscribe(
                subscription.source(),
                subscription.identifier(),
                UnsubscribeStatus::Canceled,
            );
        }

        self.identifier = None;
        self.compression = None;
        self.ping_interval = 0;
        self.ping_timeout = 0;
        self.ping_threshold = 0;
        self.ping_send_tsms = 0;
        self.pong_recv_tsms = 0;
        self.ping_wait_pong = false;
        self.pong_missed_count = 0;
        self.sequence = METHOD_SEQUENCE_START;
    }

    fn notify_connect(&mut self, status: ConnectStatus) {
        if let Some(callback) = self.options.callbacks.on_connect.as_mut() {
            callback(status);
        }
    }

    fn notify_disconnect(&mut self, status: DisconnectStatus) {
        if let Some(callback) = self.options.callbacks.on_disconnect.as_mut() {
            callback(status);
        }
    }

    fn notify_result(&mut self, reply: &CommandReply, status: CommandStatus) {
        if let Some(callback) = self.options.callbacks.on_result.as_mut() {
            callback(reply, status);
        }
    }

    fn notify_publish(&mut self, message: &EventMessage, status: PublishStatus) {
        if let Some(callback) = self.options.callbacks.on_publish.as_mut() {
            callback(message, status);
        }
    }

    fn notify_subscribe(&mut self, source: &str, event: &str, status: SubscribeStatus) {
        if let Some(callback) = self.options.callbacks.on_subscribe.as_mut() {
            callback(source, event, status);
        }
    }

    fn notify_unsubscribe(&mut self, source: &str, event: &str, status: UnsubscribeStatus) {
        if let Some(callback) = self.options.callbacks.on_unsubscribe.as_mut() {
            callback(source, event, status);
        }
    }

    fn notify_registered(&mut self, command: &str, status: RegisterStatus) {
        if let Some(callback) = self.options.callbacks.on_registered.as_mut() {
            callback(command, status);
        }
    }

    fn notify_unregistered(&mut self, command: &str, status: UnregisterStatus) {
        if let Some(callback) = self.options.callbacks.on_unregistered.as_mut() {
            callback(command, status);
        }
    }
}

impl std::fmt::Debug for MbusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MbusClient")
            .field("state", &self.state)
            .field("identifier", &self.identifier)
            .field("requests", &self.requests.len())
            .field("pendings", &self.pendings.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

fn resolve_timeout(timeout: Option<u64>, default: u64) -> u64 {
    match timeout {
        Some(t) if t > 0 => t,
        _ => default,
    }
}

fn connect_error_status(error: &io::Error) -> ConnectStatus {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => ConnectStatus::ConnectionRefused,
        io::ErrorKind::TimedOut => ConnectStatus::Timeout,
        io::ErrorKind::NotFound | io::ErrorKind::AddrNotAvailable => {
            ConnectStatus::ServerUnavailable
        }
        _ => ConnectStatus::InternalError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> MbusClient {
        MbusClient::new(Options::builder().build().unwrap())
    }

    #[test]
    fn test_initial_state() {
        let client = client();
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(client.identifier().is_none());
        assert!(!client.has_pending());
    }

    #[test]
    fn test_operations_require_connected_state() {
        let mut client = client();
        assert!(matches!(
            client.publish("event", Value::Null),
            Err(ClientError::InvalidState(_, _))
        ));
        assert!(matches!(
            client.subscribe("event"),
            Err(ClientError::InvalidState(_, _))
        ));
        assert!(matches!(
            client.command_callback("dest", "cmd", Value::Null, None, |_, _| {}),
            Err(ClientError::InvalidState(_, _))
        ));
    }

    #[test]
    fn test_exactly_once_rejected() {
        let mut client = client();
        client.state = ClientState::Connected;
        assert!(matches!(
            client.publish_with("event", Value::Null, Qos::ExactlyOnce, None, None),
            Err(ClientError::UnsupportedQos(Qos::ExactlyOnce))
        ));
    }

    #[test]
    fn test_sequence_wraps_and_skips_outstanding() {
        let mut client = client();
        client.state = ClientState::Connected;

        // An outstanding command holding the start value
        client
            .command_callback("dest", "cmd", Value::Null, None, |_, _| {})
            .unwrap();
        let held = client.requests[0].sequence().unwrap();
        assert_eq!(held, METHOD_SEQUENCE_START);

        // Force wrap: the next allocation must skip the held value
        client.sequence = METHOD_SEQUENCE_END - 1;
        let next = client.next_sequence();
        assert_eq!(next, METHOD_SEQUENCE_END - 1);
        let wrapped = client.next_sequence();
        assert_eq!(wrapped, METHOD_SEQUENCE_START + 1);
    }

    #[test]
    fn test_sequence_stays_in_range() {
        let mut client = client();
        for _ in 0..20000 {
            let sequence = client.next_sequence();
            assert!((METHOD_SEQUENCE_START..METHOD_SEQUENCE_END).contains(&sequence));
        }
    }

    #[test]
    fn test_duplicate_subscription_rejected_while_in_flight() {
        let mut client = client();
        client.state = ClientState::Connected;
        client.subscribe("event").unwrap();
        assert!(matches!(
            client.subscribe("event"),
            Err(ClientError::DuplicateSubscription { .. })
        ));
    }

    #[test]
    fn test_unsubscribe_requires_existing_subscription() {
        let mut client = client();
        client.state = ClientState::Connected;
        assert!(matches!(
            client.unsubscribe("event"),
            Err(ClientError::UnknownSubscription { .. })
        ));
    }

    #[test]
    fn test_reset_cancels_queued_requests() {
        let mut client = client();
        client.state = ClientState::Connected;

        let canceled = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&canceled);
        client
            .command_callback("dest", "cmd", Value::Null, None, move |_, status| {
                sink.lock().unwrap().push(status);
            })
            .unwrap();

        client.reset();
        assert_eq!(*canceled.lock().unwrap(), vec![CommandStatus::Canceled]);
        assert!(!client.has_pending());
        assert_eq!(client.sequence, METHOD_SEQUENCE_START);
    }

    #[test]
    fn test_run_timeout_tracks_nearest_request_deadline() {
        let mut client = client();
        client.state = ClientState::Connected;
        client
            .command_callback("dest", "cmd", Value::Null, Some(100), |_, _| {})
            .unwrap();
        assert!(client.run_timeout() <= 100);
    }
}
