//! Inbox processor feeding distance events into the [`RewardEngine`].

use crate::engine::{RewardEngine, Sighting};
use journey_relay_core::envelope::{DailyGoalAchieved, EventEnvelope, EventType, JourneyEvent};
use journey_relay_core::ledger::RewardLedger;
use journey_relay_core::outbox::OutboxLedger;
use journey_relay_runtime::consumer::{InboxProcessor, ProcessError};
use metrics::counter;

const ROUTING_KEYS: [EventType; 3] = [
    EventType::JourneyCreated,
    EventType::JourneyUpdated,
    EventType::JourneyDeleted,
];

/// Consumer of `JourneyCreated`, `JourneyUpdated` and `JourneyDeleted`.
#[derive(Clone)]
pub struct RewardProcessor {
    engine: RewardEngine,
}

impl RewardProcessor {
    /// Wrap an engine.
    #[must_use]
    pub const fn new(engine: RewardEngine) -> Self {
        Self { engine }
    }

    /// The wrapped engine.
    #[must_use]
    pub const fn engine(&self) -> &RewardEngine {
        &self.engine
    }
}

impl<Tx> InboxProcessor<Tx> for RewardProcessor
where
    Tx: RewardLedger + OutboxLedger,
{
    type Outcome = Option<DailyGoalAchieved>;

    fn name(&self) -> &'static str {
        "rewards"
    }

    fn routing_keys(&self) -> &[EventType] {
        &ROUTING_KEYS
    }

    async fn process(
        &self,
        tx: &mut Tx,
        envelope: &EventEnvelope,
    ) -> Result<Option<DailyGoalAchieved>, ProcessError> {
        match &envelope.event {
            JourneyEvent::Created(journey) => Ok(self
                .engine
                .record_distance(tx, journey, Sighting::Created, envelope.occurred_at)
                .await?),
            JourneyEvent::Updated(journey) => Ok(self
                .engine
                .record_distance(tx, journey, Sighting::Updated, envelope.occurred_at)
                .await?),
            JourneyEvent::Deleted(journey) => {
                self.engine.remove_journey(tx, journey, envelope.occurred_at).await?;
                Ok(None)
            },
            other => Err(ProcessError::Rejected {
                event_type: other.event_type(),
                reason: "not a distance event".to_string(),
            }),
        }
    }

    async fn after_commit(&self, outcome: Option<DailyGoalAchieved>) {
        if let Some(goal) = outcome {
            counter!("rewards_goals_granted_total").increment(1);
            tracing::info!(
                user_id = %goal.user_id,
                date = %goal.date,
                journey_id = %goal.journey_id,
                total_distance_km = %goal.total_distance_km,
                "Daily goal granted"
            );
        }
    }
}
