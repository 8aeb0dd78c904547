//! Invalidation bus
//!
//! Applies [`InvalidationPlan`]s: purges the registered caches, then fans
//! push events out to the connections subscribed to the product.
//!
//! # Delivery model
//!
//! - Subscriptions live in a sharded table keyed by product id. Each entry is
//!   the single logical subscription for that product and holds weak
//!   references to member connections; removing the last member removes
//!   the entry.
//! - Every connection owns a bounded queue drained by one delivery task, so
//!   events for one product reach a connection in publish order. A full
//!   queue drops its oldest event.
//! - A transient sink failure is retried with exponential backoff; an event
//!   that still fails is dropped. Delivery is at most once.

use crate::error::BusError;
use crate::event::{ClientMessage, PushEvent};
use crate::plan::{plan, InvalidationPlan, WriteEvent};
use crate::sink::PushSink;
use bazaar_cache::{CacheError, CacheLayer};
use bazaar_model::{ConnectionId, ProductId, UserId};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;

/// Bus tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BusConfig {
    /// Per-connection queue bound
    pub queue_capacity: usize,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per retry
    pub base_backoff_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_retries: 3,
            base_backoff_ms: 50,
        }
    }
}

impl BusConfig {
    /// Backoff before retry number `attempt` (0-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

/// Cache that can be purged by pattern or tag
pub trait CachePurger: Send + Sync {
    /// Purge keys matching `pattern`
    ///
    /// # Errors
    /// Malformed pattern.
    fn purge_pattern(&self, pattern: &str) -> Result<usize, CacheError>;

    /// Purge keys tagged `tag`
    fn purge_tag(&self, tag: &str) -> usize;
}

impl<V> CachePurger for CacheLayer<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn purge_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        self.invalidate_by_pattern(pattern)
    }

    fn purge_tag(&self, tag: &str) -> usize {
        self.invalidate_by_tag(tag)
    }
}

/// Counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Plans applied
    pub published: u64,
    /// Events handed to sinks
    pub delivered: u64,
    /// Retry attempts
    pub retried: u64,
    /// Events dropped after exhausting retries
    pub failed: u64,
    /// Events dropped by full queues
    pub dropped_saturated: u64,
    /// Open connections
    pub connections: u64,
    /// Products with at least one subscriber
    pub topics: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    dropped_saturated: AtomicU64,
}

/// Result of applying one plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Cache keys removed
    pub purged: usize,
    /// Events enqueued across connections
    pub enqueued: usize,
    /// Older events displaced by this publish
    pub displaced: usize,
}

struct Connection {
    id: ConnectionId,
    user: Option<UserId>,
    queue: Mutex<VecDeque<PushEvent>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    products: Mutex<HashSet<ProductId>>,
}

impl Connection {
    /// Returns whether an older event was displaced
    fn enqueue(&self, event: PushEvent) -> bool {
        if self.is_closed() {
            return false;
        }
        let displaced = {
            let mut queue = self.queue.lock();
            let displaced = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(event);
            displaced
        };
        self.notify.notify_one();
        displaced
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.queue.lock().clear();
        self.notify.notify_one();
    }
}

/// Write-to-purge-and-push fan-out
pub struct InvalidationBus {
    topics: DashMap<ProductId, HashMap<ConnectionId, Weak<Connection>>>,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    purgers: Vec<Arc<dyn CachePurger>>,
    config: BusConfig,
    counters: Arc<Counters>,
}

impl fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("topics", &self.topics.len())
            .field("connections", &self.connections.len())
            .field("purgers", &self.purgers.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl InvalidationBus {
    /// Create bus with no caches attached
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self {
            topics: DashMap::new(),
            connections: DashMap::new(),
            purgers: Vec::new(),
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Attach a cache purged by every plan
    #[must_use]
    pub fn with_purger(mut self, purger: Arc<dyn CachePurger>) -> Self {
        self.purgers.push(purger);
        self
    }

    /// Bus tuning
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register a connection and start its delivery task
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect(&self, user: Option<UserId>, sink: Arc<dyn PushSink>) -> ConnectionId {
        let id = ConnectionId::new();
        let connection = Arc::new(Connection {
            id,
            user,
            queue: Mutex::new(VecDeque::new()),
            capacity: self.config.queue_capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            products: Mutex::new(HashSet::new()),
        });
        self.connections.insert(id, Arc::clone(&connection));

        tokio::spawn(delivery_loop(
            connection,
            sink,
            self.config.clone(),
            Arc::clone(&self.counters),
        ));
        tracing::debug!(connection = %id.0, "push connection opened");
        id
    }

    /// Drop a connection and all its subscriptions
    pub fn disconnect(&self, id: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&id) else {
            return;
        };
        connection.close();
        let products: Vec<ProductId> = connection.products.lock().drain().collect();
        for product in products {
            self.leave_topic(&product, id);
        }
        tracing::debug!(connection = %id.0, "push connection closed");
    }

    /// Subscribe `id` to `product`
    ///
    /// # Errors
    /// Unknown connection.
    pub fn subscribe(&self, id: ConnectionId, product: ProductId) -> Result<(), BusError> {
        let connection = self
            .connections
            .get(&id)
            .map(|c| Arc::clone(c.value()))
            .ok_or(BusError::UnknownConnection(id))?;
        if !connection.products.lock().insert(product.clone()) {
            return Ok(());
        }
        self.topics
            .entry(product.clone())
            .or_default()
            .insert(id, Arc::downgrade(&connection));
        tracing::trace!(connection = %id.0, product = %product, "subscribed");
        Ok(())
    }

    /// Unsubscribe `id` from `product`
    ///
    /// # Errors
    /// Unknown connection.
    pub fn unsubscribe(&self, id: ConnectionId, product: &ProductId) -> Result<(), BusError> {
        let connection = self
            .connections
            .get(&id)
            .map(|c| Arc::clone(c.value()))
            .ok_or(BusError::UnknownConnection(id))?;
        if connection.products.lock().remove(product) {
            self.leave_topic(product, id);
        }
        Ok(())
    }

    fn leave_topic(&self, product: &ProductId, id: ConnectionId) {
        if let Some(mut members) = self.topics.get_mut(product) {
            members.remove(&id);
        }
        self.topics.remove_if(product, |_, members| members.is_empty());
    }

    /// Apply a control message sent by the client on `id`
    ///
    /// # Errors
    /// Malformed message or unknown connection.
    pub fn handle_message(&self, id: ConnectionId, raw: &str) -> Result<(), BusError> {
        let message: ClientMessage =
            serde_json::from_str(raw).map_err(|e| BusError::InvalidMessage(e.to_string()))?;
        match message {
            ClientMessage::Subscribe(product) => self.subscribe(id, product),
            ClientMessage::Unsubscribe(product) => self.unsubscribe(id, &product),
        }
    }

    /// Plan and apply `write`
    pub fn apply(&self, write: &WriteEvent) -> PublishReport {
        self.publish(&plan(write))
    }

    /// Purge then fan out
    ///
    /// Purges finish before this returns, so reads issued afterwards never
    /// see pre-write cache entries. Cache errors are logged, not returned.
    pub fn publish(&self, plan: &InvalidationPlan) -> PublishReport {
        let mut report = PublishReport::default();
        for purger in &self.purgers {
            for pattern in &plan.patterns {
                match purger.purge_pattern(pattern) {
                    Ok(removed) => report.purged += removed,
                    Err(err) => tracing::warn!(error = %err, pattern, "cache purge failed"),
                }
            }
            for tag in &plan.tags {
                report.purged += purger.purge_tag(tag);
            }
        }

        for event in &plan.events {
            let (enqueued, displaced) = self.fan_out(event);
            report.enqueued += enqueued;
            report.displaced += displaced;
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if report.displaced > 0 {
            self.counters
                .dropped_saturated
                .fetch_add(report.displaced as u64, Ordering::Relaxed);
            metrics::counter!("bazaar_bus_dropped_total", "reason" => "saturated")
                .increment(report.displaced as u64);
        }
        report
    }

    fn fan_out(&self, event: &PushEvent) -> (usize, usize) {
        let members: Vec<Arc<Connection>> = match self.topics.get(&event.product_id) {
            Some(members) => members.values().filter_map(Weak::upgrade).collect(),
            None => return (0, 0),
        };

        let mut enqueued = 0;
        let mut displaced = 0;
        let mut closed = Vec::new();
        for connection in members {
            if connection.is_closed() {
                closed.push(connection.id);
                continue;
            }
            if connection.enqueue(event.clone()) {
                displaced += 1;
            }
            enqueued += 1;
        }
        for id in closed {
            self.disconnect(id);
        }
        (enqueued, displaced)
    }

    /// Connections subscribed to `product`
    #[must_use]
    pub fn subscriber_count(&self, product: &ProductId) -> usize {
        self.topics.get(product).map_or(0, |m| m.len())
    }

    /// User bound to a connection
    #[must_use]
    pub fn connection_user(&self, id: ConnectionId) -> Option<UserId> {
        self.connections.get(&id).and_then(|c| c.user.clone())
    }

    /// Counters snapshot
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let c = &self.counters;
        BusStats {
            published: c.published.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped_saturated: c.dropped_saturated.load(Ordering::Relaxed),
            connections: self.connections.len() as u64,
            topics: self.topics.len() as u64,
        }
    }
}

async fn delivery_loop(
    connection: Arc<Connection>,
    sink: Arc<dyn PushSink>,
    config: BusConfig,
    counters: Arc<Counters>,
) {
    loop {
        if connection.is_closed() {
            break;
        }
        let next = connection.queue.lock().pop_front();
        match next {
            Some(event) => {
                if let Err(BusError::SinkClosed) =
                    deliver(sink.as_ref(), &event, &config, &counters).await
                {
                    connection.close();
                    break;
                }
            }
            None => connection.notify.notified().await,
        }
    }
}

async fn deliver(
    sink: &dyn PushSink,
    event: &PushEvent,
    config: &BusConfig,
    counters: &Counters,
) -> Result<(), BusError> {
    let mut attempt = 0u32;
    loop {
        match sink.send(event).await {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                counters.retried.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(config.backoff(attempt)).await;
                attempt += 1;
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("bazaar_bus_dropped_total", "reason" => "failed").increment(1);
                tracing::warn!(
                    error = %err,
                    kind = %event.kind,
                    product = %event.product_id,
                    attempts = attempt + 1,
                    "dropping push event"
                );
                return Err(err);
            }
        }
    }
}
