//! Back-propagation of reward grants onto journeys.

use crate::aggregate::Journey;
use journey_relay_core::envelope::{DailyGoalAchieved, EventEnvelope, EventType, JourneyEvent};
use journey_relay_core::ledger::JourneyLedger;
use journey_relay_runtime::consumer::{InboxProcessor, ProcessError};

const ROUTING_KEYS: [EventType; 1] = [EventType::JourneyDailyGoalAchieved];

/// What a goal event did to the journey store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalMarked {
    /// The triggering journey is now flagged.
    Marked,
    /// The flag was already set.
    AlreadyMarked,
    /// The journey was deleted before the event arrived.
    JourneyGone,
}

/// Consumer of `JourneyDailyGoalAchieved`: flags the journey whose change
/// earned the goal.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoalAchievedProcessor;

impl GoalAchievedProcessor {
    /// Create the processor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn mark<Tx: JourneyLedger>(
        tx: &mut Tx,
        goal: &DailyGoalAchieved,
    ) -> Result<GoalMarked, ProcessError> {
        let Some(record) = tx.load_journey(goal.journey_id).await? else {
            return Ok(GoalMarked::JourneyGone);
        };

        let mut journey = Journey::from_record(record);
        if !journey.mark_daily_goal_achieved() {
            return Ok(GoalMarked::AlreadyMarked);
        }
        tx.save_journey(journey.record()).await?;
        Ok(GoalMarked::Marked)
    }
}

impl<Tx> InboxProcessor<Tx> for GoalAchievedProcessor
where
    Tx: JourneyLedger,
{
    type Outcome = (DailyGoalAchieved, GoalMarked);

    fn name(&self) -> &'static str {
        "journeys"
    }

    fn routing_keys(&self) -> &[EventType] {
        &ROUTING_KEYS
    }

    async fn process(
        &self,
        tx: &mut Tx,
        envelope: &EventEnvelope,
    ) -> Result<Self::Outcome, ProcessError> {
        match &envelope.event {
            JourneyEvent::DailyGoalAchieved(goal) => {
                let marked = Self::mark(tx, goal).await?;
                Ok((goal.clone(), marked))
            },
            other => Err(ProcessError::Rejected {
                event_type: other.event_type(),
                reason: "not a goal event".to_string(),
            }),
        }
    }

    async fn after_commit(&self, (goal, marked): Self::Outcome) {
        match marked {
            GoalMarked::Marked => tracing::info!(
                journey_id = %goal.journey_id,
                user_id = %goal.user_id,
                date = %goal.date,
                "Journey marked as daily goal achiever"
            ),
            GoalMarked::AlreadyMarked => {},
            GoalMarked::JourneyGone => tracing::debug!(
                journey_id = %goal.journey_id,
                "Goal event for a deleted journey ignored"
            ),
        }
    }
}
