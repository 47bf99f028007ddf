//! Per-recipient delivery policy.
//!
//! Always try the live channel. If the recipient is offline and the event type
//! is fallback-eligible, also send an offline message. Nothing here is retried
//! and no failure propagates: the event has already been committed.

use crate::contacts::ContactDirectory;
use crate::email::OfflineNotifier;
use crate::error::NotifyError;
use crate::live::LivePush;
use crate::presence::PresenceStore;
use crate::recipients::{Notification, fallback_eligible};
use metrics::counter;
use tracing::{debug, warn};

/// What happened to the offline fallback for one notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fallback {
    /// The event type never falls back.
    NotEligible,
    /// The recipient is online.
    Online,
    /// The offline message went out.
    Sent,
    /// The offline message could not be sent.
    Failed,
}

/// Result of dispatching one notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dispatched {
    /// Live connections reached.
    pub live_connections: usize,
    /// Offline fallback outcome.
    pub fallback: Fallback,
}

/// Delivery channels of the notification service.
#[derive(Clone)]
pub struct Dispatcher<L, P, C, N> {
    live: L,
    presence: P,
    contacts: C,
    offline: N,
}

impl<L, P, C, N> Dispatcher<L, P, C, N>
where
    L: LivePush,
    P: PresenceStore,
    C: ContactDirectory,
    N: OfflineNotifier,
{
    /// Assemble a dispatcher.
    #[must_use]
    pub const fn new(live: L, presence: P, contacts: C, offline: N) -> Self {
        Self {
            live,
            presence,
            contacts,
            offline,
        }
    }

    /// Deliver one notification.
    pub async fn dispatch(&self, notification: &Notification) -> Dispatched {
        let live_connections = match self.live.push(notification).await {
            Ok(reached) => {
                counter!("notifications_live_push_total", "outcome" => "ok").increment(1);
                reached
            },
            Err(error) => {
                counter!("notifications_live_push_total", "outcome" => "failed").increment(1);
                warn!(
                    recipient = %notification.recipient,
                    event_type = %notification.event_type,
                    %error,
                    "Live push failed"
                );
                0
            },
        };

        let fallback = self.fallback(notification).await;
        debug!(
            recipient = %notification.recipient,
            event_type = %notification.event_type,
            live_connections,
            ?fallback,
            "Notification dispatched"
        );

        Dispatched {
            live_connections,
            fallback,
        }
    }

    async fn fallback(&self, notification: &Notification) -> Fallback {
        if !fallback_eligible(notification.event_type) {
            return Fallback::NotEligible;
        }

        let online = match self.presence.is_online(notification.recipient).await {
            Ok(online) => online,
            Err(error) => {
                warn!(
                    recipient = %notification.recipient,
                    %error,
                    "Presence unknown, treating recipient as offline"
                );
                false
            },
        };
        if online {
            return Fallback::Online;
        }

        match self.send_offline(notification).await {
            Ok(()) => {
                counter!("notifications_fallback_total", "outcome" => "sent").increment(1);
                Fallback::Sent
            },
            Err(error) => {
                counter!("notifications_fallback_total", "outcome" => "failed").increment(1);
                warn!(
                    recipient = %notification.recipient,
                    event_type = %notification.event_type,
                    %error,
                    "Offline fallback failed"
                );
                Fallback::Failed
            },
        }
    }

    async fn send_offline(&self, notification: &Notification) -> Result<(), NotifyError> {
        let contact = self
            .contacts
            .contact(notification.recipient)
            .await?
            .ok_or(NotifyError::NoContact(notification.recipient))?;
        self.offline.notify(&contact, notification).await
    }
}
