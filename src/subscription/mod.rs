//! Continuous subscriptions.
//!
//! A query that carries a notification topic becomes a standing
//! [`Subscription`]. Every mutation of the document set is reported to the
//! [`SubscriptionEngine`], which re-evaluates the affected subscriptions and
//! returns one [`Notification`] per notification topic whose subscriptions
//! changed. Subscriptions live in memory only.

mod engine;
mod revision;

pub use engine::{QueryExecutor, Subscription, SubscriptionEngine};
pub use revision::{Notification, Revision, RevisionMessage, RevisionOperation};
