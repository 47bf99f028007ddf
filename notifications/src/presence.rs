//! Presence markers.
//!
//! A user counts as online while `presence:{userId}` exists. The live channel
//! sets the key with a short TTL on connect, refreshes it while the socket is
//! open and deletes it on disconnect. The notification processor only reads.

use crate::error::PresenceError;
use journey_relay_core::types::UserId;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::time::Duration;

/// Default lifetime of a presence marker.
pub const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(120);

/// Liveness hints for the dispatch policy.
pub trait PresenceStore: Send + Sync {
    /// `true` if the user has a live connection somewhere.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Unavailable`] if the store cannot be read.
    fn is_online(&self, user_id: UserId) -> impl Future<Output = Result<bool, PresenceError>> + Send;

    /// Set or refresh the marker for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Unavailable`] if the write fails.
    fn mark_online(
        &self,
        user_id: UserId,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), PresenceError>> + Send;

    /// Remove the marker.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Unavailable`] if the delete fails.
    fn mark_offline(&self, user_id: UserId) -> impl Future<Output = Result<(), PresenceError>> + Send;
}

/// Redis key holding a user's marker.
#[must_use]
pub fn presence_key(user_id: UserId) -> String {
    format!("presence:{user_id}")
}

/// Redis-backed presence store.
#[derive(Clone)]
pub struct RedisPresenceStore {
    conn_manager: ConnectionManager,
}

impl RedisPresenceStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Unavailable`] if the client cannot be created
    /// or the first connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, PresenceError> {
        let client = Client::open(redis_url)
            .map_err(|e| PresenceError::Unavailable(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            PresenceError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self { conn_manager })
    }
}

impl PresenceStore for RedisPresenceStore {
    async fn is_online(&self, user_id: UserId) -> Result<bool, PresenceError> {
        let mut conn = self.conn_manager.clone();
        conn.exists(presence_key(user_id))
            .await
            .map_err(|e| PresenceError::Unavailable(format!("Failed to read presence: {e}")))
    }

    async fn mark_online(&self, user_id: UserId, ttl: Duration) -> Result<(), PresenceError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .set_ex(presence_key(user_id), 1, ttl.as_secs().max(1))
            .await
            .map_err(|e| PresenceError::Unavailable(format!("Failed to set presence: {e}")))?;
        Ok(())
    }

    async fn mark_offline(&self, user_id: UserId) -> Result<(), PresenceError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(presence_key(user_id))
            .await
            .map_err(|e| PresenceError::Unavailable(format!("Failed to clear presence: {e}")))?;
        Ok(())
    }
}
