//! Error types for notification delivery.

use journey_relay_core::types::UserId;
use thiserror::Error;

/// Errors from the live and offline delivery channels.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The live channel refused the push.
    #[error("Live push to {user_id} failed: {reason}")]
    LivePush {
        /// Recipient
        user_id: UserId,
        /// What went wrong
        reason: String,
    },

    /// The recipient has no address on file.
    #[error("No contact address for user {0}")]
    NoContact(UserId),

    /// The contact directory could not be read.
    #[error("Contact lookup failed: {0}")]
    Contacts(String),

    /// The message could not be built or sent.
    #[error("Email error: {0}")]
    Email(String),

    /// Payload serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the presence store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresenceError {
    /// The store could not be reached or refused the command.
    #[error("Presence store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for delivery operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
