//! Errors returned by journey commands.

use journey_relay_core::store::StoreError;
use journey_relay_core::types::{Distance, JourneyId, UserId};
use thiserror::Error;

/// Why a journey command was refused or failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JourneyError {
    /// No journey with this id.
    #[error("Journey {0} not found")]
    NotFound(JourneyId),

    /// Only the owner may perform this command.
    #[error("User {user_id} does not own journey {journey_id}")]
    NotOwner {
        /// The journey
        journey_id: JourneyId,
        /// Who tried
        user_id: UserId,
    },

    /// Distances are never negative.
    #[error("Invalid distance: {0} (must not be negative)")]
    InvalidDistance(Distance),

    /// A journey cannot be shared with its own owner.
    #[error("Journey {0} cannot be shared with its owner")]
    ShareWithOwner(JourneyId),

    /// The store failed; conflicts may be retried by the caller.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JourneyError {
    /// `true` when retrying the whole command may succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}

/// Result type for journey commands.
pub type Result<T> = std::result::Result<T, JourneyError>;
