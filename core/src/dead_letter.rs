//! Dead-letter port.
//!
//! Messages that cannot be applied (undecodable payloads, or handlers that keep
//! failing past the delivery cap) are parked here instead of being redelivered
//! forever.

use crate::event_bus::BrokerMessage;
use crate::store::StoreError;
use std::future::Future;
use std::pin::Pin;

/// A message that was given up on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    /// Consumer that gave up (e.g. `rewards`).
    pub consumer: String,
    /// The original message.
    pub message: BrokerMessage,
    /// Last error.
    pub error: String,
    /// Deliveries made before giving up.
    pub attempts: u32,
}

/// Destination for dead letters.
pub trait DeadLetterSink: Send + Sync {
    /// Park a message.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the message could not be stored; the caller
    /// must then keep the message on the broker.
    fn dead_letter(
        &self,
        letter: DeadLetter,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}
