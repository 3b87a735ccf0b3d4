//! Messages handed to application callbacks

use mbus_core::{CommandMethod, EventMethod, ResultMethod};
use serde_json::Value;

/// An event as seen by subscription and publish callbacks
#[derive(Debug, Clone)]
pub struct EventMessage {
    inner: EventMethod,
}

impl EventMessage {
    pub(crate) fn new(inner: EventMethod) -> Self {
        Self { inner }
    }

    /// Identifier of the client that published the event
    pub fn source(&self) -> Option<&str> {
        self.inner.source.as_deref()
    }

    pub fn destination(&self) -> Option<&str> {
        self.inner.destination.as_deref()
    }

    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    pub fn payload(&self) -> &Value {
        &self.inner.payload
    }
}

/// A completed (or failed) command: the original request plus the
/// correlated result frame, when one arrived
#[derive(Debug, Clone)]
pub struct CommandReply {
    request: CommandMethod,
    response: Option<ResultMethod>,
}

impl CommandReply {
    pub(crate) fn new(request: CommandMethod, response: Option<ResultMethod>) -> Self {
        Self { request, response }
    }

    pub fn request_destination(&self) -> &str {
        &self.request.destination
    }

    pub fn request_identifier(&self) -> &str {
        &self.request.identifier
    }

    pub fn request_payload(&self) -> &Value {
        &self.request.payload
    }

    /// Integer status from the result frame; zero means success.
    /// `None` when the command never received a result (timeout, cancel).
    pub fn response_status(&self) -> Option<i32> {
        self.response.as_ref().map(|r| r.status)
    }

    pub fn response_payload(&self) -> Option<&Value> {
        self.response.as_ref().map(|r| &r.payload)
    }
}
