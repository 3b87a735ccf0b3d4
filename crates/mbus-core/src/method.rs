//! Protocol envelope types
//!
//! One frame body is one `Method` envelope: a command request, an event, or
//! a correlated command result. The `type` key carries the namespaced tag;
//! the remaining keys are `source`, `destination`, `identifier`, `sequence`,
//! `payload`, `timeout`, and `status`, not all present on all types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol envelope, tagged by the `type` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Method {
    #[serde(rename = "org.mbus.method.type.command")]
    Command(CommandMethod),

    #[serde(rename = "org.mbus.method.type.event")]
    Event(EventMethod),

    #[serde(rename = "org.mbus.method.type.result")]
    Result(ResultMethod),
}

/// Command request envelope, awaiting a correlated result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMethod {
    pub destination: String,
    pub identifier: String,
    pub sequence: u32,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Event envelope, delivered to zero or more subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMethod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Result envelope, correlated to a command request by sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMethod {
    pub sequence: u32,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub payload: Value,
}

impl Method {
    /// Sequence number of the envelope, if it carries one
    pub fn sequence(&self) -> Option<u32> {
        match self {
            Method::Command(command) => Some(command.sequence),
            Method::Event(event) => event.sequence,
            Method::Result(result) => Some(result.sequence),
        }
    }
}
