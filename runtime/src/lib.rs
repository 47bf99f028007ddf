//! # Journey Relay Runtime
//!
//! The background tasks every service runs on top of the core ports:
//!
//! - [`publisher::OutboxPublisher`] drains the local outbox to the broker.
//! - [`consumer::InboxConsumer`] applies broker deliveries exactly once through
//!   an [`consumer::InboxProcessor`].
//!
//! Plus the shared [`config`], [`retry`] policy and Prometheus [`metrics`].
//!
//! Both tasks observe a `tokio::sync::watch` shutdown flag between units of
//! work. Work in flight at shutdown is abandoned: the transaction rolls back
//! and the delivery is handed back to the broker.

pub mod config;
pub mod consumer;
pub mod metrics;
pub mod publisher;
pub mod retry;

pub use consumer::{Handled, InboxConsumer, InboxProcessor, ProcessError};
pub use publisher::{OutboxPublisher, PublishError, PublishReport};
