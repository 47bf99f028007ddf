//! Mock delivery ports for tests.

use crate::contacts::{Contact, ContactDirectory};
use crate::email::OfflineNotifier;
use crate::error::{NotifyError, PresenceError, Result};
use crate::live::LivePush;
use crate::presence::PresenceStore;
use crate::recipients::Notification;
use journey_relay_core::types::UserId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Live channel that records every push; every recipient counts as one
/// connection.
#[derive(Clone, Debug, Default)]
pub struct RecordingLivePush {
    pushes: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingLivePush {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every push attempt, in order.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test infrastructure
    pub fn pushes(&self) -> Vec<Notification> {
        self.pushes.lock().unwrap().clone()
    }

    /// Make pushes fail (they are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl LivePush for RecordingLivePush {
    #[allow(clippy::unwrap_used)] // Test infrastructure
    async fn push(&self, notification: &Notification) -> Result<usize> {
        self.pushes.lock().unwrap().push(notification.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::LivePush {
                user_id: notification.recipient,
                reason: "mock failure".to_string(),
            });
        }
        Ok(1)
    }
}

/// Presence store backed by a set.
#[derive(Clone, Debug, Default)]
pub struct StaticPresence {
    online: Arc<Mutex<HashSet<UserId>>>,
    failing: Arc<AtomicBool>,
}

impl StaticPresence {
    /// Nobody online.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a user online.
    #[allow(clippy::unwrap_used)] // Test infrastructure
    pub fn set_online(&self, user_id: UserId) {
        self.online.lock().unwrap().insert(user_id);
    }

    /// Make every read and write fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> std::result::Result<(), PresenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PresenceError::Unavailable("mock failure".to_string()));
        }
        Ok(())
    }
}

impl PresenceStore for StaticPresence {
    #[allow(clippy::unwrap_used)] // Test infrastructure
    async fn is_online(&self, user_id: UserId) -> std::result::Result<bool, PresenceError> {
        self.check()?;
        Ok(self.online.lock().unwrap().contains(&user_id))
    }

    #[allow(clippy::unwrap_used)] // Test infrastructure
    async fn mark_online(
        &self,
        user_id: UserId,
        _ttl: Duration,
    ) -> std::result::Result<(), PresenceError> {
        self.check()?;
        self.online.lock().unwrap().insert(user_id);
        Ok(())
    }

    #[allow(clippy::unwrap_used)] // Test infrastructure
    async fn mark_offline(&self, user_id: UserId) -> std::result::Result<(), PresenceError> {
        self.check()?;
        self.online.lock().unwrap().remove(&user_id);
        Ok(())
    }
}

/// Contact directory backed by a map.
#[derive(Clone, Debug, Default)]
pub struct InMemoryContacts {
    contacts: Arc<Mutex<HashMap<UserId, Contact>>>,
}

impl InMemoryContacts {
    /// Empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a contact.
    #[allow(clippy::unwrap_used)] // Test infrastructure
    pub fn insert(&self, user_id: UserId, email: impl Into<String>) {
        self.contacts.lock().unwrap().insert(
            user_id,
            Contact {
                email: email.into(),
                display_name: None,
            },
        );
    }
}

impl ContactDirectory for InMemoryContacts {
    #[allow(clippy::unwrap_used)] // Test infrastructure
    async fn contact(&self, user_id: UserId) -> Result<Option<Contact>> {
        Ok(self.contacts.lock().unwrap().get(&user_id).cloned())
    }
}

/// Offline notifier that records instead of sending.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(Contact, Notification)>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message sent, in order.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test infrastructure
    pub fn sent(&self) -> Vec<(Contact, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    /// Make sends fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl OfflineNotifier for RecordingNotifier {
    #[allow(clippy::unwrap_used)] // Test infrastructure
    async fn notify(&self, contact: &Contact, notification: &Notification) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Email("mock failure".to_string()));
        }
        self.sent.lock().unwrap().push((contact.clone(), notification.clone()));
        Ok(())
    }
}
