//! Topic-based publish/subscribe fan-out.
//!
//! Every subscription owns a bounded queue. `publish` never waits: it
//! `try_send`s into each queue while holding the registry's read lock. A
//! subscriber whose queue is full is disconnected from the topic (its handle
//! drains what was already queued, then reports
//! [`BusError::TopicDeliveryOverflow`]). Unsubscribing takes the write lock,
//! so once it returns no publisher can still be enqueueing into that channel.
//!
//! There is no backlog: a subscription only sees events published after
//! `subscribe` returned.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use log::{debug, warn};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{Event, EventPayload, Topic};
use crate::error::BusError;

/// Per-subscription queue length used when none is configured.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

pub type SubscriptionId = u64;

struct Subscriber {
    sender: mpsc::Sender<Arc<Event>>,
    overflowed: Arc<AtomicBool>,
}

pub struct EventBus {
    topics: RwLock<HashMap<Topic, HashMap<SubscriptionId, Subscriber>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl EventBus {
    /// Creates a bus whose subscriptions each buffer up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Registers a new subscription on `topic`.
    pub fn subscribe(self: &Arc<Self>, topic: Topic) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);
        let overflowed = Arc::new(AtomicBool::new(false));

        self.topics.write().entry(topic).or_default().insert(
            id,
            Subscriber {
                sender,
                overflowed: Arc::clone(&overflowed),
            },
        );
        debug!("subscription {} registered on {}", id, topic);

        SubscriptionHandle {
            id,
            topic,
            receiver,
            overflowed,
            overflow_reported: false,
            bus: Arc::downgrade(self),
        }
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write();
        let removed = topics
            .get_mut(&topic)
            .map(|subscribers| subscribers.remove(&id).is_some())
            .unwrap_or(false);
        if topics.get(&topic).is_some_and(HashMap::is_empty) {
            topics.remove(&topic);
        }
        if removed {
            debug!("subscription {} released from {}", id, topic);
        }
        removed
    }

    /// Delivers an event to every subscription currently registered on
    /// `topic` and returns how many accepted it.
    pub fn publish(&self, topic: Topic, payload: EventPayload) -> usize {
        let event = Arc::new(Event::new(topic, payload));
        let mut stale = Vec::new();

        let delivered = {
            let topics = self.topics.read();
            let Some(subscribers) = topics.get(&topic) else {
                return 0;
            };

            let mut delivered = 0;
            for (id, subscriber) in subscribers {
                if subscriber.overflowed.load(Ordering::Acquire) {
                    continue;
                }
                match subscriber.sender.try_send(Arc::clone(&event)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        subscriber.overflowed.store(true, Ordering::Release);
                        warn!(
                            "subscription {} on {} overflowed after {} queued events; disconnecting",
                            id, topic, self.buffer
                        );
                        stale.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => stale.push(*id),
                }
            }
            delivered
        };

        for id in stale {
            self.unsubscribe(topic, id);
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.read().get(&topic).map_or(0, HashMap::len)
    }

    /// Releases every subscription. Open handles finish after draining.
    pub fn shutdown(&self) {
        let released: usize = self.topics.write().drain().map(|(_, subs)| subs.len()).sum();
        debug!("event bus shut down, released {} subscriptions", released);
    }
}

/// The receiving end of one subscription.
///
/// Dropping the handle unsubscribes it.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: Topic,
    receiver: mpsc::Receiver<Arc<Event>>,
    overflowed: Arc<AtomicBool>,
    overflow_reported: bool,
    bus: Weak<EventBus>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the subscription has been released and drained.
    /// An overflowed subscription yields `TopicDeliveryOverflow` once, after
    /// the events queued before the overflow.
    pub async fn recv(&mut self) -> Option<Result<Arc<Event>, BusError>> {
        match self.receiver.recv().await {
            Some(event) => Some(Ok(event)),
            None => self.take_overflow().map(Err),
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv) that ignores overflow.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.try_recv().ok()
    }

    /// Stops delivery and discards anything still buffered. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.topic, self.id);
        }
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
    }

    fn take_overflow(&mut self) -> Option<BusError> {
        if self.overflowed.load(Ordering::Acquire) && !self.overflow_reported {
            self.overflow_reported = true;
            Some(BusError::TopicDeliveryOverflow(self.topic))
        } else {
            None
        }
    }
}

impl Stream for SubscriptionHandle {
    type Item = Result<Arc<Event>, BusError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(None) => Poll::Ready(this.take_overflow().map(Err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.topic, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskStatus};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn task(title: &str) -> Task {
        Task {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            author: "john@example.com".to_string(),
            created_at: Utc::now(),
        }
    }

    fn titles(handle: &mut SubscriptionHandle) -> Vec<String> {
        let mut seen = Vec::new();
        while let Some(event) = handle.try_recv() {
            match &event.payload {
                EventPayload::Task(task) => seen.push(task.title.clone()),
                EventPayload::TaskId(id) => seen.push(id.to_string()),
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_publish_order() {
        let bus = Arc::new(EventBus::new(16));
        let mut first = bus.subscribe(Topic::TaskAdded);
        let mut second = bus.subscribe(Topic::TaskAdded);

        for title in ["a", "b", "c", "d"] {
            assert_eq!(bus.publish(Topic::TaskAdded, EventPayload::Task(task(title))), 2);
        }

        assert_eq!(titles(&mut first), vec!["a", "b", "c", "d"]);
        assert_eq!(titles(&mut second), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = Arc::new(EventBus::default());
        let mut added = bus.subscribe(Topic::TaskAdded);
        let mut deleted = bus.subscribe(Topic::TaskDeleted);

        bus.publish(Topic::TaskDeleted, EventPayload::TaskId(Uuid::new_v4()));

        assert!(added.try_recv().is_none());
        assert_eq!(deleted.try_recv().unwrap().topic, Topic::TaskDeleted);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_backlog() {
        let bus = Arc::new(EventBus::default());
        for title in ["one", "two", "three"] {
            assert_eq!(bus.publish(Topic::TaskAdded, EventPayload::Task(task(title))), 0);
        }

        let mut late = bus.subscribe(Topic::TaskAdded);
        assert!(late.try_recv().is_none());

        bus.publish(Topic::TaskAdded, EventPayload::Task(task("four")));
        assert_eq!(titles(&mut late), vec!["four"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery_and_is_idempotent() {
        let bus = Arc::new(EventBus::default());
        let mut handle = bus.subscribe(Topic::TaskUpdated);
        bus.publish(Topic::TaskUpdated, EventPayload::Task(task("before")));

        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!bus.unsubscribe(Topic::TaskUpdated, handle.id()));
        assert_eq!(bus.subscriber_count(Topic::TaskUpdated), 0);

        bus.publish(Topic::TaskUpdated, EventPayload::Task(task("after")));
        assert!(handle.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_handle_releases_subscription() {
        let bus = Arc::new(EventBus::default());
        let handle = bus.subscribe(Topic::TaskAdded);
        assert_eq!(bus.subscriber_count(Topic::TaskAdded), 1);
        drop(handle);
        assert_eq!(bus.subscriber_count(Topic::TaskAdded), 0);
    }

    #[tokio::test]
    async fn test_overflow_disconnects_only_the_slow_subscriber() {
        let bus = Arc::new(EventBus::new(2));
        let mut slow = bus.subscribe(Topic::TaskAdded);
        let mut fast = bus.subscribe(Topic::TaskAdded);

        bus.publish(Topic::TaskAdded, EventPayload::Task(task("1")));
        bus.publish(Topic::TaskAdded, EventPayload::Task(task("2")));
        assert_eq!(titles(&mut fast), vec!["1", "2"]);

        // `slow` is still holding two events; the third overflows it.
        assert_eq!(bus.publish(Topic::TaskAdded, EventPayload::Task(task("3"))), 1);
        assert_eq!(bus.subscriber_count(Topic::TaskAdded), 1);
        assert_eq!(titles(&mut fast), vec!["3"]);

        let mut drained = Vec::new();
        while let Some(item) = slow.recv().await {
            drained.push(item);
        }
        assert_eq!(drained.len(), 3);
        assert!(drained[..2].iter().all(Result::is_ok));
        assert_eq!(
            drained[2].clone().unwrap_err(),
            BusError::TopicDeliveryOverflow(Topic::TaskAdded)
        );
    }

    #[tokio::test]
    async fn test_publish_prunes_dropped_receivers() {
        let bus = Arc::new(EventBus::default());
        let mut handle = bus.subscribe(Topic::TaskAdded);
        handle.receiver.close();
        assert_eq!(bus.subscriber_count(Topic::TaskAdded), 1);

        assert_eq!(bus.publish(Topic::TaskAdded, EventPayload::Task(task("x"))), 0);
        assert_eq!(bus.subscriber_count(Topic::TaskAdded), 0);
        assert!(!bus.unsubscribe(Topic::TaskAdded, handle.id()));
    }

    #[tokio::test]
    async fn test_shutdown_ends_all_subscriptions() {
        let bus = Arc::new(EventBus::default());
        let mut a = bus.subscribe(Topic::TaskAdded);
        let mut b = bus.subscribe(Topic::TaskDeleted);

        bus.shutdown();

        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        assert_eq!(bus.subscriber_count(Topic::TaskAdded), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_and_publish() {
        let bus = Arc::new(EventBus::new(1024));
        let mut stable = bus.subscribe(Topic::TaskAdded);

        let churn = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                for _ in 0..200 {
                    let mut handle = bus.subscribe(Topic::TaskAdded);
                    tokio::task::yield_now().await;
                    handle.unsubscribe();
                }
            })
        };
        let publisher = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                for i in 0..200 {
                    bus.publish(Topic::TaskAdded, EventPayload::Task(task(&i.to_string())));
                    tokio::task::yield_now().await;
                }
            })
        };
        churn.await.unwrap();
        publisher.await.unwrap();

        let expected: Vec<String> = (0..200).map(|i| i.to_string()).collect();
        assert_eq!(titles(&mut stable), expected);
        assert_eq!(bus.subscriber_count(Topic::TaskAdded), 1);
    }
}
