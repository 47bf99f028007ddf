//! Inbox processor for the notification service.
//!
//! Recipients are resolved, and relationship mirrors updated, inside the
//! inbox transaction. Delivery happens only after the commit, so a retried or
//! rolled-back transaction never pushes anything.

use crate::contacts::ContactDirectory;
use crate::dispatch::{Dispatched, Dispatcher};
use crate::email::OfflineNotifier;
use crate::live::LivePush;
use crate::presence::PresenceStore;
use crate::recipients::{self, Notification};
use journey_relay_core::envelope::{EventEnvelope, EventType};
use journey_relay_core::ledger::RecipientLedger;
use journey_relay_runtime::consumer::{InboxProcessor, ProcessError};

const ROUTING_KEYS: [EventType; 7] = [
    EventType::JourneyUpdated,
    EventType::JourneyDeleted,
    EventType::JourneyDailyGoalAchieved,
    EventType::JourneyFavorited,
    EventType::JourneyUnfavorited,
    EventType::JourneyShared,
    EventType::JourneyUnshared,
];

/// Fan-out of journey lifecycle events to interested users.
#[derive(Clone)]
pub struct NotificationProcessor<L, P, C, N> {
    dispatcher: Dispatcher<L, P, C, N>,
}

impl<L, P, C, N> NotificationProcessor<L, P, C, N>
where
    L: LivePush,
    P: PresenceStore,
    C: ContactDirectory,
    N: OfflineNotifier,
{
    /// Wrap a dispatcher.
    #[must_use]
    pub const fn new(dispatcher: Dispatcher<L, P, C, N>) -> Self {
        Self { dispatcher }
    }

    /// Deliver already-resolved notifications one by one.
    pub async fn deliver(&self, notifications: &[Notification]) -> Vec<Dispatched> {
        let mut results = Vec::with_capacity(notifications.len());
        for notification in notifications {
            results.push(self.dispatcher.dispatch(notification).await);
        }
        results
    }
}

impl<Tx, L, P, C, N> InboxProcessor<Tx> for NotificationProcessor<L, P, C, N>
where
    Tx: RecipientLedger,
    L: LivePush,
    P: PresenceStore,
    C: ContactDirectory,
    N: OfflineNotifier,
{
    type Outcome = Vec<Notification>;

    fn name(&self) -> &'static str {
        "notifications"
    }

    fn routing_keys(&self) -> &[EventType] {
        &ROUTING_KEYS
    }

    async fn process(
        &self,
        tx: &mut Tx,
        envelope: &EventEnvelope,
    ) -> Result<Vec<Notification>, ProcessError> {
        let notifications = recipients::resolve(tx, &envelope.event).await?;
        tracing::debug!(
            event_id = %envelope.id,
            event_type = %envelope.event_type(),
            recipients = notifications.len(),
            "Recipients resolved"
        );
        Ok(notifications)
    }

    async fn after_commit(&self, notifications: Vec<Notification>) {
        self.deliver(&notifications).await;
    }
}
