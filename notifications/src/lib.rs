//! # Journey Relay Notifications
//!
//! Fans journey lifecycle events out to the users who care about them.
//!
//! ```text
//! broker ──► InboxConsumer ──► NotificationProcessor
//!                                 │  resolve recipients + mirror relationships (in tx)
//!                                 ▼
//!                             Dispatcher (after commit)
//!                                 ├─ LivePush ──► LiveHub ──► WebSocket /live
//!                                 └─ offline and eligible?
//!                                       PresenceStore ─► ContactDirectory ─► OfflineNotifier
//! ```
//!
//! Live pushes are best effort and at most once. Offline e-mail goes out only
//! for `JourneyShared`, `JourneyDailyGoalAchieved`, `JourneyFavorited`,
//! `JourneyUpdated` and `JourneyDeleted`, and only when the recipient has no
//! presence marker.

pub mod config;
pub mod contacts;
pub mod dispatch;
pub mod email;
pub mod error;
pub mod live;
pub mod presence;
pub mod processor;
pub mod recipients;

#[cfg(feature = "test-utils")]
pub mod mocks;

pub use contacts::{Contact, ContactDirectory, PgContactDirectory};
pub use dispatch::{Dispatched, Dispatcher, Fallback};
pub use email::{ConsoleNotifier, EmailNotifier, OfflineNotifier, SmtpNotifier};
pub use error::{NotifyError, PresenceError};
pub use live::{LiveHub, LivePush, LiveState};
pub use presence::{PresenceStore, RedisPresenceStore};
pub use processor::NotificationProcessor;
pub use recipients::{Notification, fallback_eligible};
