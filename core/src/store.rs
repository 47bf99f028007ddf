//! Transactional store ports.
//!
//! A [`TransactionalStore`] opens a [`UnitOfWork`]; the ledger traits in
//! [`crate::outbox`], [`crate::inbox`] and [`crate::ledger`] are implemented on
//! that transaction type, so every read and write a handler performs lands in
//! the same atomic unit as the inbox row and the outbox rows.
//!
//! Dropping a unit of work without committing rolls it back.

use std::future::Future;
use thiserror::Error;

/// Errors raised by store implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Concurrent writers collided (serialization failure, deadlock or unique
    /// violation). Retrying the whole transaction is safe.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Any other database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// `true` for errors that a fresh transaction may not hit again.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// An open transaction.
pub trait UnitOfWork: Send + Sized {
    /// Commit every write made through this transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the commit lost a race, or
    /// [`StoreError::Database`] for other failures.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A store that hands out transactions.
pub trait TransactionalStore: Send + Sync {
    /// The transaction type; ledger ports are implemented on it.
    type Tx: UnitOfWork;

    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no connection is available.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;
}
