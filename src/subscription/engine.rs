//! Standing query registry and change propagation.
//!
//! Subscriptions are grouped into buckets by notification topic. The topic
//! map is guarded by an `RwLock`; each bucket has its own `Mutex`. An owner
//! index maps every reference id to its topic, so registration touches at
//! most two buckets. Re-evaluation snapshots a bucket, runs the searches with
//! no lock held and then applies the results to subscriptions that were not
//! replaced in the meantime. A reference id is unique across all buckets.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::document::DeviceDescription;
use crate::error::{RepositoryError, RepositoryResult, ValidationError};
use crate::query::Filter;

use super::revision::{Notification, RevisionMessage, RevisionOperation};

/// Executes compiled filters against the current document set.
///
/// Failures and timeouts are reported as an empty result.
pub trait QueryExecutor: Send + Sync {
    /// Runs the filter and returns the matching documents.
    fn execute(&self, filter: &Filter) -> Vec<DeviceDescription>;
}

/// A standing query.
#[derive(Debug, Clone)]
pub struct Subscription {
    reference_id: String,
    notification_topic: String,
    requirements: Vec<Value>,
    scoring_criteria: Vec<Value>,
    filter: Filter,
    last_result: Vec<DeviceDescription>,
    generation: u64,
}

impl Subscription {
    /// Creates a subscription holding an already computed result.
    pub fn new(
        reference_id: impl Into<String>,
        notification_topic: impl Into<String>,
        requirements: Vec<Value>,
        scoring_criteria: Vec<Value>,
        filter: Filter,
        last_result: Vec<DeviceDescription>,
    ) -> Result<Self, ValidationError> {
        let reference_id = reference_id.into();
        let notification_topic = notification_topic.into();
        if reference_id.is_empty() {
            return Err(ValidationError::EmptyField {
                field: "referenceId".to_string(),
            });
        }
        if notification_topic.is_empty() {
            return Err(ValidationError::EmptyField {
                field: "notificationTopic".to_string(),
            });
        }

        Ok(Self {
            reference_id,
            notification_topic,
            requirements,
            scoring_criteria,
            filter,
            last_result,
            generation: 0,
        })
    }

    /// Client-chosen id of this standing query.
    #[must_use]
    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    /// Topic revisions for this query are published to.
    #[must_use]
    pub fn notification_topic(&self) -> &str {
        &self.notification_topic
    }

    /// Raw requirements as received.
    #[must_use]
    pub fn requirements(&self) -> &[Value] {
        &self.requirements
    }

    /// Carried for the protocol; never evaluated.
    #[must_use]
    pub fn scoring_criteria(&self) -> &[Value] {
        &self.scoring_criteria
    }

    /// Compiled form of [`requirements`](Self::requirements).
    #[must_use]
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// The result of the most recent evaluation.
    #[must_use]
    pub fn last_result(&self) -> &[DeviceDescription] {
        &self.last_result
    }

    fn result_contains(&self, doc: &DeviceDescription) -> bool {
        self.last_result.iter().any(|d| d.same_device(doc))
    }
}

type Bucket = Arc<Mutex<BTreeMap<String, Subscription>>>;

#[derive(Debug, Default)]
struct Registry {
    buckets: HashMap<String, Bucket>,
    owners: HashMap<String, String>,
}

impl Registry {
    fn remove(&mut self, reference_id: &str) -> RepositoryResult<bool> {
        let Some(topic) = self.owners.remove(reference_id) else {
            return Ok(false);
        };
        let Some(bucket) = self.buckets.get(&topic) else {
            return Ok(false);
        };

        let (removed, emptied) = {
            let mut bucket = bucket.lock().map_err(|_| lock_err("subscription.remove"))?;
            let removed = bucket.remove(reference_id).is_some();
            (removed, bucket.is_empty())
        };
        if emptied {
            self.buckets.remove(&topic);
        }
        Ok(removed)
    }
}

/// One subscription picked for re-evaluation.
struct Pending {
    reference_id: String,
    generation: u64,
    filter: Filter,
}

fn lock_err(context: &'static str) -> RepositoryError {
    RepositoryError::internal(format!("poisoned lock: {context}"))
}

/// Registry of standing queries.
#[derive(Debug, Default)]
pub struct SubscriptionEngine {
    registry: RwLock<Registry>,
    generations: AtomicU64,
}

impl SubscriptionEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a subscription, replacing any subscription with the same
    /// reference id regardless of its topic.
    pub fn register(&self, mut subscription: Subscription) -> RepositoryResult<()> {
        subscription.generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;

        let mut registry = self.registry.write().map_err(|_| lock_err("subscription.register"))?;
        registry.remove(subscription.reference_id())?;

        registry.owners.insert(
            subscription.reference_id.clone(),
            subscription.notification_topic.clone(),
        );
        let bucket = registry
            .buckets
            .entry(subscription.notification_topic.clone())
            .or_default();
        let mut bucket = bucket.lock().map_err(|_| lock_err("subscription.bucket"))?;

        debug!(
            reference_id = %subscription.reference_id,
            topic = %subscription.notification_topic,
            "subscription registered"
        );
        bucket.insert(subscription.reference_id.clone(), subscription);
        Ok(())
    }

    /// Removes the subscription with this reference id.
    /// Returns true if one was removed.
    pub fn unregister(&self, reference_id: &str) -> RepositoryResult<bool> {
        if reference_id.is_empty() {
            return Ok(false);
        }
        let mut registry = self.registry.write().map_err(|_| lock_err("subscription.unregister"))?;
        let removed = registry.remove(reference_id)?;
        if removed {
            debug!(reference_id, "subscription removed");
        }
        Ok(removed)
    }

    /// Total number of subscriptions.
    pub fn subscription_count(&self) -> RepositoryResult<usize> {
        let registry = self.registry.read().map_err(|_| lock_err("subscription.count"))?;
        Ok(registry.owners.len())
    }

    /// Number of notification topics with at least one subscription.
    pub fn topic_count(&self) -> RepositoryResult<usize> {
        let registry = self.registry.read().map_err(|_| lock_err("subscription.topic_count"))?;
        Ok(registry.buckets.len())
    }

    /// Returns a copy of the subscription with this reference id.
    pub fn get(&self, reference_id: &str) -> RepositoryResult<Option<Subscription>> {
        let bucket = {
            let registry = self.registry.read().map_err(|_| lock_err("subscription.get"))?;
            let Some(topic) = registry.owners.get(reference_id) else {
                return Ok(None);
            };
            registry.buckets.get(topic).map(Arc::clone)
        };
        let Some(bucket) = bucket else {
            return Ok(None);
        };
        let bucket = bucket.lock().map_err(|_| lock_err("subscription.get"))?;
        Ok(bucket.get(reference_id).cloned())
    }

    /// Re-evaluates every subscription after `inserted` was stored.
    ///
    /// A subscription is affected if the inserted device is part of its new
    /// result; its stored result is then replaced.
    pub fn on_insert(
        &self,
        inserted: &DeviceDescription,
        executor: &dyn QueryExecutor,
    ) -> RepositoryResult<Vec<Notification>> {
        self.propagate(
            "subscription.on_insert",
            |_| true,
            |filter| {
                let result = executor.execute(filter);
                result.iter().any(|d| d.same_device(inserted)).then_some(result)
            },
            || RevisionOperation::Upsert {
                device_descriptions: vec![inserted.clone()],
            },
        )
    }

    /// Re-evaluates every subscription whose stored result held the device
    /// described by `deleted`. Documents without a MAC address affect nobody.
    pub fn on_delete(
        &self,
        deleted: &DeviceDescription,
        executor: &dyn QueryExecutor,
    ) -> RepositoryResult<Vec<Notification>> {
        let Some(mac) = deleted.mac_address() else {
            debug!("deleted document has no MAC address, nothing to notify");
            return Ok(Vec::new());
        };

        self.propagate(
            "subscription.on_delete",
            |sub| sub.result_contains(deleted),
            |filter| Some(executor.execute(filter)),
            || RevisionOperation::Delete {
                mac_addresses: vec![mac.to_string()],
            },
        )
    }

    /// Empties every non-empty stored result.
    pub fn on_clear(&self) -> RepositoryResult<Vec<Notification>> {
        self.propagate(
            "subscription.on_clear",
            |sub| !sub.last_result.is_empty(),
            |_| Some(Vec::new()),
            || RevisionOperation::Replace {
                device_descriptions: Vec::new(),
            },
        )
    }

    fn buckets(&self) -> RepositoryResult<Vec<(String, Bucket)>> {
        let registry = self.registry.read().map_err(|_| lock_err("subscription.snapshot"))?;
        Ok(registry
            .buckets
            .iter()
            .map(|(topic, bucket)| (topic.clone(), Arc::clone(bucket)))
            .collect())
    }

    /// Re-evaluates subscriptions bucket by bucket and builds one
    /// notification per topic with at least one affected subscription.
    ///
    /// `select` runs under the bucket lock. `evaluate` runs unlocked and
    /// returns the new result of an affected subscription. A result is only
    /// stored if the subscription was not replaced while it was computed.
    fn propagate<S, E, O>(
        &self,
        context: &'static str,
        select: S,
        evaluate: E,
        operation: O,
    ) -> RepositoryResult<Vec<Notification>>
    where
        S: Fn(&Subscription) -> bool,
        E: Fn(&Filter) -> Option<Vec<DeviceDescription>>,
        O: Fn() -> RevisionOperation,
    {
        let mut notifications = Vec::new();

        for (topic, bucket) in self.buckets()? {
            let pending: Vec<Pending> = {
                let bucket = bucket.lock().map_err(|_| lock_err(context))?;
                bucket
                    .values()
                    .filter(|&sub| select(sub))
                    .map(|sub| Pending {
                        reference_id: sub.reference_id.clone(),
                        generation: sub.generation,
                        filter: sub.filter.clone(),
                    })
                    .collect()
            };

            let evaluated: Vec<(Pending, Vec<DeviceDescription>)> = pending
                .into_iter()
                .filter_map(|p| evaluate(&p.filter).map(|result| (p, result)))
                .collect();

            let mut reference_ids = BTreeSet::new();
            if !evaluated.is_empty() {
                let mut bucket = bucket.lock().map_err(|_| lock_err(context))?;
                for (pending, result) in evaluated {
                    match bucket.get_mut(&pending.reference_id) {
                        Some(sub) if sub.generation == pending.generation => {
                            sub.last_result = result;
                            reference_ids.insert(pending.reference_id);
                        }
                        _ => debug!(
                            reference_id = %pending.reference_id,
                            "subscription replaced during re-evaluation"
                        ),
                    }
                }
            }

            if reference_ids.is_empty() {
                debug!(topic = %topic, context, "no subscription affected");
                continue;
            }
            notifications.push(Notification {
                topic,
                message: RevisionMessage::single(reference_ids, operation()),
            });
        }

        Ok(notifications)
    }
}
