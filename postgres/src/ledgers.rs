//! Reward, recipient and journey ledgers on [`PgTx`].

use crate::store::PgTx;
use crate::{decode_error, store_error};
use chrono::NaiveDate;
use journey_relay_core::ledger::{
    DailyAggregate, JourneyFact, JourneyLedger, JourneyRecord, RecipientLedger, RewardLedger,
};
use journey_relay_core::store::StoreError;
use journey_relay_core::types::{Distance, JourneyId, PublicLinkId, UserId};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

fn row_to_fact(row: &PgRow) -> Result<JourneyFact, StoreError> {
    Ok(JourneyFact {
        journey_id: JourneyId::from_uuid(row.try_get("journey_id").map_err(decode_error)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode_error)?),
        day: row.try_get("day").map_err(decode_error)?,
        distance: Distance::from_hundredths(
            row.try_get("distance_hundredths").map_err(decode_error)?,
        ),
        last_occurred_at: row.try_get("last_occurred_at").map_err(decode_error)?,
        deleted: row.try_get("deleted").map_err(decode_error)?,
    })
}

fn row_to_aggregate(row: &PgRow) -> Result<DailyAggregate, StoreError> {
    let triggering: Option<Uuid> = row.try_get("triggering_journey_id").map_err(decode_error)?;
    Ok(DailyAggregate {
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode_error)?),
        day: row.try_get("day").map_err(decode_error)?,
        total: Distance::from_hundredths(row.try_get("total_hundredths").map_err(decode_error)?),
        reward_granted: row.try_get("reward_granted").map_err(decode_error)?,
        triggering_journey_id: triggering.map(JourneyId::from_uuid),
    })
}

fn row_to_journey(row: &PgRow) -> Result<JourneyRecord, StoreError> {
    let favorited_by: Vec<Uuid> = row.try_get("favorited_by").map_err(decode_error)?;
    let shared_with: Vec<Uuid> = row.try_get("shared_with").map_err(decode_error)?;
    let public_link: Option<Uuid> = row.try_get("public_link_id").map_err(decode_error)?;

    Ok(JourneyRecord {
        id: JourneyId::from_uuid(row.try_get("id").map_err(decode_error)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode_error)?),
        start_time: row.try_get("start_time").map_err(decode_error)?,
        distance: Distance::from_hundredths(
            row.try_get("distance_hundredths").map_err(decode_error)?,
        ),
        is_daily_goal_achieved: row.try_get("is_daily_goal_achieved").map_err(decode_error)?,
        favorited_by: favorited_by.into_iter().map(UserId::from_uuid).collect(),
        shared_with: shared_with.into_iter().map(UserId::from_uuid).collect(),
        public_link_id: public_link.map(PublicLinkId::from_uuid),
    })
}

impl RewardLedger for PgTx {
    async fn journey_fact(&mut self, journey_id: JourneyId) -> Result<Option<JourneyFact>, StoreError> {
        // FOR UPDATE alone locks nothing before the first sighting, so two
        // first sightings of one journey serialize on an advisory lock instead.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(journey_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;

        let row = sqlx::query(
            r"
            SELECT journey_id, user_id, day, distance_hundredths, last_occurred_at, deleted
            FROM journey_facts
            WHERE journey_id = $1
            FOR UPDATE
            ",
        )
        .bind(journey_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(store_error)?;

        row.as_ref().map(row_to_fact).transpose()
    }

    async fn save_journey_fact(&mut self, fact: &JourneyFact) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO journey_facts (
                journey_id, user_id, day, distance_hundredths, last_occurred_at, deleted
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (journey_id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                day = EXCLUDED.day,
                distance_hundredths = EXCLUDED.distance_hundredths,
                last_occurred_at = EXCLUDED.last_occurred_at,
                deleted = EXCLUDED.deleted
            ",
        )
        .bind(fact.journey_id.as_uuid())
        .bind(fact.user_id.as_uuid())
        .bind(fact.day)
        .bind(fact.distance.hundredths())
        .bind(fact.last_occurred_at)
        .bind(fact.deleted)
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn lock_daily_total(
        &mut self,
        user_id: UserId,
        day: NaiveDate,
    ) -> Result<DailyAggregate, StoreError> {
        // Make sure the row exists so there is something to lock; two first
        // sightings racing here serialize on the primary key.
        sqlx::query(
            r"
            INSERT INTO daily_distance_totals (user_id, day)
            VALUES ($1, $2)
            ON CONFLICT (user_id, day) DO NOTHING
            ",
        )
        .bind(user_id.as_uuid())
        .bind(day)
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;

        let row = sqlx::query(
            r"
            SELECT user_id, day, total_hundredths, reward_granted, triggering_journey_id
            FROM daily_distance_totals
            WHERE user_id = $1 AND day = $2
            FOR UPDATE
            ",
        )
        .bind(user_id.as_uuid())
        .bind(day)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(store_error)?;

        row_to_aggregate(&row)
    }

    async fn save_daily_total(&mut self, aggregate: &DailyAggregate) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE daily_distance_totals
            SET total_hundredths = $3,
                reward_granted = $4,
                triggering_journey_id = $5,
                updated_at = NOW()
            WHERE user_id = $1 AND day = $2
            ",
        )
        .bind(aggregate.user_id.as_uuid())
        .bind(aggregate.day)
        .bind(aggregate.total.hundredths())
        .bind(aggregate.reward_granted)
        .bind(aggregate.triggering_journey_id.map(|id| id.as_uuid()))
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;
        Ok(())
    }
}

impl RecipientLedger for PgTx {
    async fn upsert_favorite(
        &mut self,
        journey_id: JourneyId,
        user_id: UserId,
        owner_id: UserId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO journey_favorites (journey_id, user_id, owner_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (journey_id, user_id) DO UPDATE SET owner_id = EXCLUDED.owner_id
            ",
        )
        .bind(journey_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(owner_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn remove_favorite(&mut self, journey_id: JourneyId, user_id: UserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM journey_favorites WHERE journey_id = $1 AND user_id = $2")
            .bind(journey_id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn upsert_share(
        &mut self,
        journey_id: JourneyId,
        owner_id: UserId,
        shared_with: UserId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO journey_shares (journey_id, shared_with_id, owner_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (journey_id, shared_with_id) DO UPDATE SET owner_id = EXCLUDED.owner_id
            ",
        )
        .bind(journey_id.as_uuid())
        .bind(shared_with.as_uuid())
        .bind(owner_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn remove_share(&mut self, journey_id: JourneyId, shared_with: UserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM journey_shares WHERE journey_id = $1 AND shared_with_id = $2")
            .bind(journey_id.as_uuid())
            .bind(shared_with.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn favoriters(&mut self, journey_id: JourneyId) -> Result<Vec<UserId>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM journey_favorites WHERE journey_id = $1 ORDER BY user_id",
        )
        .bind(journey_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(store_error)?;

        Ok(ids.into_iter().map(UserId::from_uuid).collect())
    }

    async fn purge_journey(&mut self, journey_id: JourneyId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM journey_favorites WHERE journey_id = $1")
            .bind(journey_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;
        sqlx::query("DELETE FROM journey_shares WHERE journey_id = $1")
            .bind(journey_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

impl JourneyLedger for PgTx {
    async fn load_journey(&mut self, journey_id: JourneyId) -> Result<Option<JourneyRecord>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, start_time, distance_hundredths, is_daily_goal_achieved,
                   favorited_by, shared_with, public_link_id
            FROM journeys
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(journey_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(store_error)?;

        row.as_ref().map(row_to_journey).transpose()
    }

    async fn save_journey(&mut self, journey: &JourneyRecord) -> Result<(), StoreError> {
        let favorited_by: Vec<Uuid> = journey.favorited_by.iter().map(UserId::as_uuid).collect();
        let shared_with: Vec<Uuid> = journey.shared_with.iter().map(UserId::as_uuid).collect();

        sqlx::query(
            r"
            INSERT INTO journeys (
                id, user_id, start_time, distance_hundredths, is_daily_goal_achieved,
                favorited_by, shared_with, public_link_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                start_time = EXCLUDED.start_time,
                distance_hundredths = EXCLUDED.distance_hundredths,
                is_daily_goal_achieved = EXCLUDED.is_daily_goal_achieved,
                favorited_by = EXCLUDED.favorited_by,
                shared_with = EXCLUDED.shared_with,
                public_link_id = EXCLUDED.public_link_id
            ",
        )
        .bind(journey.id.as_uuid())
        .bind(journey.user_id.as_uuid())
        .bind(journey.start_time)
        .bind(journey.distance.hundredths())
        .bind(journey.is_daily_goal_achieved)
        .bind(favorited_by)
        .bind(shared_with)
        .bind(journey.public_link_id.map(|id| id.as_uuid()))
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn delete_journey(&mut self, journey_id: JourneyId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM journeys WHERE id = $1")
            .bind(journey_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}
