//! Event envelope, type registry and the closed set of journey events.
//!
//! Every state change that crosses a service boundary travels as an
//! [`EventEnvelope`]: a stable [`EventId`], the time it happened, and one
//! [`JourneyEvent`] variant carrying the type-specific payload. The envelope is
//! decoded exactly once, at the consumer boundary, from its JSON wire form
//! ([`WireEnvelope`]); everything downstream works with the typed union.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "id": "5f0c…",
//!   "type": "JourneyCreated",
//!   "occurredAt": "2025-01-01T08:00:00Z",
//!   "payload": { "journeyId": "…", "userId": "…", "startTime": "…", "distanceKm": "5.00" }
//! }
//! ```
//!
//! The `type` field doubles as the broker routing key.

use crate::types::{Distance, EventId, JourneyId, PublicLinkId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Namespace for deterministic daily-goal event ids.
const DAILY_GOAL_NAMESPACE: Uuid = Uuid::from_u128(0x6a0f_3c1e_9d4b_4f7a_8e2c_51b7_d09a_c3e4);

/// Errors raised while decoding an envelope from the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are not a JSON envelope at all.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The envelope is well-formed but its type is not in the registry.
    #[error("Unknown event type '{event_type}' for event {id}")]
    UnknownType {
        /// Envelope id (still usable as an inbox key).
        id: EventId,
        /// The unrecognised type name.
        event_type: String,
        /// When the event happened.
        occurred_at: DateTime<Utc>,
    },

    /// The type is known but the payload does not match its shape.
    #[error("Invalid payload for {event_type} event {id}: {reason}")]
    InvalidPayload {
        /// Envelope id.
        id: EventId,
        /// The declared type.
        event_type: EventType,
        /// Why the payload was rejected.
        reason: String,
    },
}

/// Errors raised while encoding an envelope.
#[derive(Error, Debug)]
#[error("Failed to encode {event_type} event {id}: {reason}")]
pub struct EncodeError {
    /// Envelope id.
    pub id: EventId,
    /// Event type.
    pub event_type: EventType,
    /// Serializer message.
    pub reason: String,
}

/// Discriminator of every event the system exchanges.
///
/// [`EventType::as_str`] is the routing key used on the broker. Serde uses the
/// same names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    /// A journey was logged.
    JourneyCreated,
    /// A journey's date or distance changed.
    JourneyUpdated,
    /// A journey was removed.
    JourneyDeleted,
    /// A user crossed the daily distance goal.
    JourneyDailyGoalAchieved,
    /// A user favorited a journey.
    JourneyFavorited,
    /// A user removed a favorite.
    JourneyUnfavorited,
    /// A journey was shared with a user or through a public link.
    JourneyShared,
    /// A share was revoked.
    JourneyUnshared,
}

impl EventType {
    /// Every registered type.
    pub const ALL: [Self; 8] = [
        Self::JourneyCreated,
        Self::JourneyUpdated,
        Self::JourneyDeleted,
        Self::JourneyDailyGoalAchieved,
        Self::JourneyFavorited,
        Self::JourneyUnfavorited,
        Self::JourneyShared,
        Self::JourneyUnshared,
    ];

    /// Stable name, used as the routing key and in the outbox `type` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JourneyCreated => "JourneyCreated",
            Self::JourneyUpdated => "JourneyUpdated",
            Self::JourneyDeleted => "JourneyDeleted",
            Self::JourneyDailyGoalAchieved => "JourneyDailyGoalAchieved",
            Self::JourneyFavorited => "JourneyFavorited",
            Self::JourneyUnfavorited => "JourneyUnfavorited",
            Self::JourneyShared => "JourneyShared",
            Self::JourneyUnshared => "JourneyUnshared",
        }
    }

    /// Look a type up by name. Returns `None` for anything unregistered.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `JourneyCreated`, `JourneyUpdated` and `JourneyDeleted`.
///
/// For deletions the fields describe the journey as it was last stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyDistance {
    /// The journey.
    pub journey_id: JourneyId,
    /// Owner of the journey.
    pub user_id: UserId,
    /// Start of the journey (UTC); its date is the reward bucket.
    pub start_time: DateTime<Utc>,
    /// Distance travelled.
    pub distance_km: Distance,
}

/// Payload of `JourneyDailyGoalAchieved`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyGoalAchieved {
    /// The journey whose change crossed the goal.
    pub journey_id: JourneyId,
    /// The user who earned the reward.
    pub user_id: UserId,
    /// The calendar day the reward belongs to.
    pub date: NaiveDate,
    /// Day total at the moment of the grant.
    pub total_distance_km: Distance,
}

/// Payload of `JourneyFavorited`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyFavorited {
    /// The journey.
    pub journey_id: JourneyId,
    /// The user who favorited it.
    pub user_id: UserId,
    /// Owner of the journey.
    pub journey_owner_id: UserId,
}

/// Payload of `JourneyUnfavorited`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyUnfavorited {
    /// The journey.
    pub journey_id: JourneyId,
    /// The user who removed the favorite.
    pub user_id: UserId,
}

/// Payload of `JourneyShared`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyShared {
    /// Owner of the journey.
    pub owner_user_id: UserId,
    /// The journey.
    pub journey_id: JourneyId,
    /// Who performed the share.
    pub actor_user_id: UserId,
    /// Direct-share recipient, if this is a per-user share.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_with_user_id: Option<UserId>,
    /// Public link, if this is a link share.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_link_id: Option<PublicLinkId>,
}

/// Payload of `JourneyUnshared`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyUnshared {
    /// The journey.
    pub journey_id: JourneyId,
    /// Who revoked the share.
    pub revoked_by_user_id: UserId,
    /// Revoked public link, if this is a link revocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_link_id: Option<PublicLinkId>,
    /// User whose direct share was revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unshared_from_user_id: Option<UserId>,
}

/// The closed set of events, one variant per [`EventType`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JourneyEvent {
    /// `JourneyCreated`
    Created(JourneyDistance),
    /// `JourneyUpdated`
    Updated(JourneyDistance),
    /// `JourneyDeleted`
    Deleted(JourneyDistance),
    /// `JourneyDailyGoalAchieved`
    DailyGoalAchieved(DailyGoalAchieved),
    /// `JourneyFavorited`
    Favorited(JourneyFavorited),
    /// `JourneyUnfavorited`
    Unfavorited(JourneyUnfavorited),
    /// `JourneyShared`
    Shared(JourneyShared),
    /// `JourneyUnshared`
    Unshared(JourneyUnshared),
}

impl JourneyEvent {
    /// The discriminator for this variant.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Created(_) => EventType::JourneyCreated,
            Self::Updated(_) => EventType::JourneyUpdated,
            Self::Deleted(_) => EventType::JourneyDeleted,
            Self::DailyGoalAchieved(_) => EventType::JourneyDailyGoalAchieved,
            Self::Favorited(_) => EventType::JourneyFavorited,
            Self::Unfavorited(_) => EventType::JourneyUnfavorited,
            Self::Shared(_) => EventType::JourneyShared,
            Self::Unshared(_) => EventType::JourneyUnshared,
        }
    }

    /// The journey this event is about.
    #[must_use]
    pub const fn journey_id(&self) -> JourneyId {
        match self {
            Self::Created(p) | Self::Updated(p) | Self::Deleted(p) => p.journey_id,
            Self::DailyGoalAchieved(p) => p.journey_id,
            Self::Favorited(p) => p.journey_id,
            Self::Unfavorited(p) => p.journey_id,
            Self::Shared(p) => p.journey_id,
            Self::Unshared(p) => p.journey_id,
        }
    }

    /// Decode a payload for an already-resolved type.
    ///
    /// # Errors
    ///
    /// Returns the serde message if the payload does not match the type's shape.
    pub fn from_payload(event_type: EventType, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match event_type {
            EventType::JourneyCreated => Self::Created(serde_json::from_value(payload)?),
            EventType::JourneyUpdated => Self::Updated(serde_json::from_value(payload)?),
            EventType::JourneyDeleted => Self::Deleted(serde_json::from_value(payload)?),
            EventType::JourneyDailyGoalAchieved => {
                Self::DailyGoalAchieved(serde_json::from_value(payload)?)
            },
            EventType::JourneyFavorited => Self::Favorited(serde_json::from_value(payload)?),
            EventType::JourneyUnfavorited => Self::Unfavorited(serde_json::from_value(payload)?),
            EventType::JourneyShared => Self::Shared(serde_json::from_value(payload)?),
            EventType::JourneyUnshared => Self::Unshared(serde_json::from_value(payload)?),
        })
    }

    /// Encode the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns the serde error if encoding fails.
    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Created(p) | Self::Updated(p) | Self::Deleted(p) => serde_json::to_value(p),
            Self::DailyGoalAchieved(p) => serde_json::to_value(p),
            Self::Favorited(p) => serde_json::to_value(p),
            Self::Unfavorited(p) => serde_json::to_value(p),
            Self::Shared(p) => serde_json::to_value(p),
            Self::Unshared(p) => serde_json::to_value(p),
        }
    }
}

/// Something that happened, with the identity used for de-duplication.
///
/// The id is assigned once at creation and never reused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventEnvelope {
    /// De-duplication key.
    pub id: EventId,
    /// When the change happened.
    pub occurred_at: DateTime<Utc>,
    /// Type-specific payload.
    pub event: JourneyEvent,
}

impl EventEnvelope {
    /// Wrap a new event under a fresh id.
    #[must_use]
    pub fn new(event: JourneyEvent, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            occurred_at,
            event,
        }
    }

    /// Wrap an event under a known id.
    #[must_use]
    pub const fn with_id(id: EventId, event: JourneyEvent, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id,
            occurred_at,
            event,
        }
    }

    /// Build the goal event for `(user, day)`.
    ///
    /// The id is derived from the user and day, so the same grant always maps
    /// to the same envelope id.
    #[must_use]
    pub fn daily_goal(goal: DailyGoalAchieved, occurred_at: DateTime<Utc>) -> Self {
        let name = format!("{}:{}", goal.user_id, goal.date);
        let id = EventId::from_uuid(Uuid::new_v5(&DAILY_GOAL_NAMESPACE, name.as_bytes()));
        Self::with_id(id, JourneyEvent::DailyGoalAchieved(goal), occurred_at)
    }

    /// The discriminator of the wrapped event.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    /// Convert into the JSON wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the payload cannot be serialized.
    pub fn to_wire(&self) -> Result<WireEnvelope, EncodeError> {
        let payload = self.event.to_payload().map_err(|e| EncodeError {
            id: self.id,
            event_type: self.event_type(),
            reason: e.to_string(),
        })?;

        Ok(WireEnvelope {
            id: self.id,
            event_type: self.event_type().as_str().to_string(),
            occurred_at: self.occurred_at,
            payload,
        })
    }

    /// Encode as JSON bytes, the body of a broker message.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the payload cannot be serialized.
    pub fn to_json(&self) -> Result<String, EncodeError> {
        let wire = self.to_wire()?;
        serde_json::to_string(&wire).map_err(|e| EncodeError {
            id: self.id,
            event_type: self.event_type(),
            reason: e.to_string(),
        })
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// See [`DecodeError`].
    pub fn from_json(bytes: &[u8]) -> Result<Self, DecodeError> {
        WireEnvelope::parse(bytes)?.decode()
    }
}

/// The untyped envelope as it travels through the outbox and the broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    /// De-duplication key.
    pub id: EventId,
    /// Type name / routing key.
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the change happened.
    pub occurred_at: DateTime<Utc>,
    /// Type-specific payload.
    pub payload: Value,
}

impl WireEnvelope {
    /// Parse the outer JSON shape without interpreting the payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] if the bytes are not an envelope.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    /// Resolve the type and decode the payload into the closed union.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownType`] or [`DecodeError::InvalidPayload`].
    pub fn decode(self) -> Result<EventEnvelope, DecodeError> {
        let Some(event_type) = EventType::parse(&self.event_type) else {
            return Err(DecodeError::UnknownType {
                id: self.id,
                event_type: self.event_type,
                occurred_at: self.occurred_at,
            });
        };

        let invalid = |reason: String| DecodeError::InvalidPayload {
            id: self.id,
            event_type,
            reason,
        };

        let event = JourneyEvent::from_payload(event_type, self.payload)
            .map_err(|e| invalid(e.to_string()))?;

        if let JourneyEvent::Created(p) | JourneyEvent::Updated(p) | JourneyEvent::Deleted(p) =
            &event
        {
            if p.distance_km.is_negative() {
                return Err(invalid(format!("negative distance {}", p.distance_km)));
            }
        }

        Ok(EventEnvelope::with_id(self.id, event, self.occurred_at))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn created() -> EventEnvelope {
        EventEnvelope::new(
            JourneyEvent::Created(JourneyDistance {
                journey_id: JourneyId::new(),
                user_id: UserId::new(),
                start_time: Utc.with_ymd_and_hms(2025, 3, 1, 23, 30, 0).unwrap(),
                distance_km: "12.34".parse().unwrap(),
            }),
            Utc.with_ymd_and_hms(2025, 3, 1, 23, 31, 0).unwrap(),
        )
    }

    #[test]
    fn every_type_name_parses_back() {
        for t in EventType::ALL {
            assert_eq!(EventType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EventType::parse("JourneyArchived"), None);
    }

    #[test]
    fn wire_form_uses_camel_case_fields() {
        let envelope = created();
        let json: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "JourneyCreated");
        assert!(json.get("occurredAt").is_some());
        assert_eq!(json["payload"]["distanceKm"], "12.34");
        assert!(json["payload"].get("journeyId").is_some());
    }

    #[test]
    fn decoding_preserves_identity_and_payload() {
        let envelope = created();
        let decoded = EventEnvelope::from_json(envelope.to_json().unwrap().as_bytes()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn unknown_type_keeps_id_for_inbox() {
        let id = EventId::new();
        let body = serde_json::json!({
            "id": id,
            "type": "JourneyArchived",
            "occurredAt": "2025-01-01T00:00:00Z",
            "payload": {}
        });

        let err = EventEnvelope::from_json(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType { id: got, .. } if got == id));
    }

    #[test]
    fn invalid_payload_is_reported_with_type() {
        let body = serde_json::json!({
            "id": EventId::new(),
            "type": "JourneyFavorited",
            "occurredAt": "2025-01-01T00:00:00Z",
            "payload": { "journeyId": "not-a-uuid" }
        });

        let err = EventEnvelope::from_json(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidPayload { event_type: EventType::JourneyFavorited, .. }
        ));
    }

    #[test]
    fn negative_distance_is_rejected() {
        let body = serde_json::json!({
            "id": EventId::new(),
            "type": "JourneyUpdated",
            "occurredAt": "2025-01-01T00:00:00Z",
            "payload": {
                "journeyId": JourneyId::new(),
                "userId": UserId::new(),
                "startTime": "2025-01-01T08:00:00Z",
                "distanceKm": "-1.00"
            }
        });

        let err = EventEnvelope::from_json(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { .. }));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            EventEnvelope::from_json(b"not json"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn daily_goal_ids_are_stable_per_user_and_day() {
        let user = UserId::new();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let goal = |journey| DailyGoalAchieved {
            journey_id: journey,
            user_id: user,
            date,
            total_distance_km: Distance::from_km(21),
        };

        let a = EventEnvelope::daily_goal(goal(JourneyId::new()), Utc::now());
        let b = EventEnvelope::daily_goal(goal(JourneyId::new()), Utc::now());
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn share_optionals_are_omitted_when_absent() {
        let shared = JourneyShared {
            owner_user_id: UserId::new(),
            journey_id: JourneyId::new(),
            actor_user_id: UserId::new(),
            shared_with_user_id: None,
            public_link_id: Some(PublicLinkId::new()),
        };
        let json = serde_json::to_value(&shared).unwrap();
        assert!(json.get("sharedWithUserId").is_none());
        assert!(json.get("publicLinkId").is_some());
    }
}
