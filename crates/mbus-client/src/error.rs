//! Client error types
//!
//! These cover programmer errors only: invalid state for a call, a missing
//! required argument, a duplicate subscription. Transport and protocol
//! failures never surface here; they resolve through the notification
//! callbacks with a status from their own family.

use crate::status::{ClientState, Qos};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("client state is {0}, operation requires {1}")]
    InvalidState(ClientState, ClientState),

    #[error("{0} is required")]
    MissingArgument(&'static str),

    #[error("invalid server protocol: {0}")]
    InvalidProtocol(String),

    // The field is named `from` rather than `source`: thiserror reserves a
    // `source` field for error chaining.
    #[error("subscription already exists for source {from}, event {event}")]
    DuplicateSubscription { from: String, event: String },

    #[error("no subscription for source {from}, event {event}")]
    UnknownSubscription { from: String, event: String },

    #[error("routine already registered: {0}")]
    DuplicateRoutine(String),

    #[error("no registered routine: {0}")]
    UnknownRoutine(String),

    #[error("qos {0:?} is not supported")]
    UnsupportedQos(Qos),

    #[error("protocol error: {0}")]
    Protocol(#[from] mbus_core::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_subscription_errors_render_the_pair() {
        let error = ClientError::DuplicateSubscription {
            from: "peer".to_string(),
            event: "an.event".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "subscription already exists for source peer, event an.event"
        );
        assert!(error.source().is_none());

        let error = ClientError::UnknownSubscription {
            from: "peer".to_string(),
            event: "an.event".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "no subscription for source peer, event an.event"
        );
        assert!(error.source().is_none());
    }
}
