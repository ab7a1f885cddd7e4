//! # Relay Error Types
//!
//! Error types for channel handoff operations. Absence of data is never an
//! error: non-blocking calls return `None` and blocking calls wait.

use thiserror::Error;

/// Errors that can occur during relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    // ========================================================================
    // Cancellation
    // ========================================================================
    /// A blocking call was woken because the client is flushing.
    #[error("Client is flushing")]
    Flushing,

    // ========================================================================
    // Role Lifecycle Errors
    // ========================================================================
    /// A producer or consumer role was used before `start()`.
    #[error("Endpoint not started")]
    NotStarted,

    /// `start()` was called on a role that is already attached.
    #[error("Endpoint already started on channel '{0}'")]
    AlreadyStarted(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Channel configuration failed validation.
    #[error("Invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// Caps are missing fields required by a per-medium slot.
    #[error("Invalid caps: {0}")]
    InvalidCaps(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Error from the runtime layer.
    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),
}

impl RelayError {
    /// Returns `true` if the call was interrupted by flushing rather than failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RelayError::Flushing)
    }

    /// Returns `true` if this error comes from using a role out of order.
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            RelayError::NotStarted | RelayError::AlreadyStarted(_)
        )
    }

    /// Returns `true` if this error is due to bad configuration or caps.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RelayError::InvalidConfig(_) | RelayError::InvalidCaps(_) | RelayError::Runtime(_)
        )
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
