//! Contact directory for the offline fallback.

use crate::error::{NotifyError, Result};
use journey_relay_core::types::UserId;
use sqlx::{PgPool, Row};
use std::future::Future;

/// Where to reach a user when they are offline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    /// E-mail address.
    pub email: String,
    /// Name to greet them with.
    pub display_name: Option<String>,
}

/// Lookup of contact addresses.
pub trait ContactDirectory: Send + Sync {
    /// Contact details for `user_id`, if any are on file.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Contacts`] if the directory cannot be read.
    fn contact(&self, user_id: UserId) -> impl Future<Output = Result<Option<Contact>>> + Send;
}

/// Directory backed by the `user_contacts` table the user service maintains.
#[derive(Clone, Debug)]
pub struct PgContactDirectory {
    pool: PgPool,
}

impl PgContactDirectory {
    /// Read contacts from `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ContactDirectory for PgContactDirectory {
    async fn contact(&self, user_id: UserId) -> Result<Option<Contact>> {
        let row = sqlx::query("SELECT email, display_name FROM user_contacts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| NotifyError::Contacts(e.to_string()))?;

        row.map(|row| {
            Ok(Contact {
                email: row.try_get("email").map_err(|e| NotifyError::Contacts(e.to_string()))?,
                display_name: row
                    .try_get("display_name")
                    .map_err(|e| NotifyError::Contacts(e.to_string()))?,
            })
        })
        .transpose()
    }
}
