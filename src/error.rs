//! # Error Types
//!
//! Crate-level error taxonomy. Caller-input and routing errors surface
//! synchronously from `dispatch`; delivery errors only ever reach the job
//! store and event listeners.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Invalid recipients: {message}")]
    InvalidRecipients { message: String },

    #[error("Invalid payload for {kind}: {message}")]
    InvalidPayload { kind: String, message: String },

    #[error("Unsupported operation: {kind}")]
    UnsupportedOperation { kind: String },

    #[error("Permanent delivery failure: {reason}")]
    PermanentDelivery { reason: String },

    #[error("Transient delivery failure: {reason}")]
    TransientDelivery { reason: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BroadcastError {
    pub fn invalid_recipients(message: impl Into<String>) -> Self {
        Self::InvalidRecipients {
            message: message.into(),
        }
    }

    pub fn invalid_payload(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_operation(kind: impl Into<String>) -> Self {
        Self::UnsupportedOperation { kind: kind.into() }
    }

    pub fn permanent_delivery(reason: impl Into<String>) -> Self {
        Self::PermanentDelivery {
            reason: reason.into(),
        }
    }

    pub fn transient_delivery(reason: impl Into<String>) -> Self {
        Self::TransientDelivery {
            reason: reason.into(),
        }
    }

    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// True when the durable job store could not be reached
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable { .. }))
    }

    /// Caller-input errors raised before anything was enqueued
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRecipients { .. } | Self::InvalidPayload { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BroadcastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BroadcastError::invalid_payload("text", "text must not be empty");
        assert_eq!(
            err.to_string(),
            "Invalid payload for text: text must not be empty"
        );

        let err = BroadcastError::unsupported_operation("send_hologram");
        assert_eq!(err.to_string(), "Unsupported operation: send_hologram");
    }

    #[test]
    fn test_store_unavailable_detection() {
        let err: BroadcastError = StoreError::unavailable("connection refused").into();
        assert!(err.is_store_unavailable());
        assert!(!err.is_validation_error());

        let err = BroadcastError::invalid_recipients("empty");
        assert!(err.is_validation_error());
    }
}
