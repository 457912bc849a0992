//! The per-agent event bus.
//!
//! Publication is non-blocking: each subscription owns a bounded queue,
//! and on overflow the oldest event is dropped and the subscription's drop
//! counter incremented. The subscription table is guarded by a
//! reader-writer lock; publishers take only the read lock, so they never
//! serialize against each other.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::Notify;
use tracing::trace;

use super::{Channel, Event, Payload, now_ms};

/// Default per-subscription queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Minimum interval between subscriber-overflow notices per subscription.
const OVERFLOW_NOTICE_INTERVAL_MS: u64 = 1_000;

/// Options for [`EventBus::subscribe_with`].
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    channels: Vec<Channel>,
    event_types: Option<Vec<String>>,
    capacity: usize,
}

impl SubscribeOptions {
    /// Subscribe to the given channels with no event-type filter.
    #[must_use]
    pub fn channels(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            channels: channels.into_iter().collect(),
            event_types: None,
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Subscribe to all three channels.
    #[must_use]
    pub fn all() -> Self {
        Self::channels(Channel::ALL)
    }

    /// Restrict delivery to the given event types.
    #[must_use]
    pub fn event_types<S: Into<String>>(mut self, types: impl IntoIterator<Item = S>) -> Self {
        self.event_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Override the queue capacity (minimum 1).
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

struct SubscriptionInner {
    channels: Vec<Channel>,
    event_types: Option<Vec<String>>,
    capacity: usize,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
    last_overflow_notice_ms: AtomicU64,
}

impl SubscriptionInner {
    fn matches(&self, event: &Event) -> bool {
        if !self.channels.contains(&event.channel()) {
            return false;
        }
        match &self.event_types {
            None => true,
            Some(types) => types.iter().any(|t| t == event.event_type()),
        }
    }

    /// Push an event, dropping the oldest on overflow. Returns `true`
    /// when something was dropped.
    fn push(&self, event: Event) -> bool {
        let mut queue = self.queue.lock().expect("subscription queue poisoned");
        let mut dropped = false;
        if queue.len() >= self.capacity {
            let _ = queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            dropped = true;
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_waiters();
        dropped
    }

    fn pop(&self) -> Option<Event> {
        self.queue
            .lock()
            .expect("subscription queue poisoned")
            .pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether an overflow notice is due, applying the rate limit.
    fn overflow_notice_due(&self) -> bool {
        let now = now_ms();
        let last = self.last_overflow_notice_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) < OVERFLOW_NOTICE_INTERVAL_MS {
            return false;
        }
        self.last_overflow_notice_ms
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

struct BusShared {
    agent_id: String,
    seq: AtomicU64,
    subscriptions: RwLock<Vec<Arc<SubscriptionInner>>>,
    closed: AtomicBool,
}

/// A per-agent, three-channel publish/subscribe fabric.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<BusShared>,
}

impl EventBus {
    /// Create a bus for the given agent.
    #[must_use]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(BusShared {
                agent_id: agent_id.into(),
                seq: AtomicU64::new(0),
                subscriptions: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Publish a payload to every matching subscription. Never blocks.
    pub fn publish(&self, payload: Payload) {
        self.publish_inner(payload, true);
    }

    fn publish_inner(&self, payload: Payload, allow_overflow_notice: bool) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }

        let event = Event {
            agent_id: self.shared.agent_id.clone(),
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            timestamp_ms: now_ms(),
            payload,
        };
        trace!(
            agent = %event.agent_id,
            channel = %event.channel(),
            r#type = event.event_type(),
            seq = event.seq,
            "publish"
        );

        let mut overflowed = Vec::new();
        {
            let subs = self
                .shared
                .subscriptions
                .read()
                .expect("subscription table poisoned");
            for sub in subs.iter() {
                if sub.is_closed() || !sub.matches(&event) {
                    continue;
                }
                if sub.push(event.clone()) && allow_overflow_notice && sub.overflow_notice_due() {
                    overflowed.push(Arc::clone(sub));
                }
            }
        }

        // The notice itself must not trigger further notices.
        for _ in overflowed {
            self.publish_inner(
                Payload::Error {
                    kind: "subscriber-overflow",
                    message: "subscription queue full; oldest events dropped".to_owned(),
                },
                false,
            );
        }
    }

    /// Attach a subscription over the given channels (no type filter,
    /// default capacity).
    #[must_use]
    pub fn subscribe(&self, channels: impl IntoIterator<Item = Channel>) -> Subscription {
        self.subscribe_with(SubscribeOptions::channels(channels))
    }

    /// Attach a subscription with explicit options.
    #[must_use]
    pub fn subscribe_with(&self, options: SubscribeOptions) -> Subscription {
        let inner = Arc::new(SubscriptionInner {
            channels: options.channels,
            event_types: options.event_types,
            capacity: options.capacity,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(self.shared.closed.load(Ordering::Acquire)),
            last_overflow_notice_ms: AtomicU64::new(0),
        });

        let mut subs = self
            .shared
            .subscriptions
            .write()
            .expect("subscription table poisoned");
        subs.retain(|s| !s.is_closed());
        subs.push(Arc::clone(&inner));
        drop(subs);

        Subscription { inner }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscriptions
            .read()
            .expect("subscription table poisoned")
            .iter()
            .filter(|s| !s.is_closed())
            .count()
    }

    /// Sequence number the next published event will carry.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.shared.seq.load(Ordering::Relaxed)
    }

    /// Close the bus: all subscriptions are torn down and further
    /// publishes are dropped. Idempotent.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let subs = self
            .shared
            .subscriptions
            .read()
            .expect("subscription table poisoned");
        for sub in subs.iter() {
            sub.close();
        }
    }

    /// Whether the bus has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("agent_id", &self.shared.agent_id)
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One consumer's bounded view of an agent's event streams.
///
/// Dropping the subscription closes it.
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    /// Receive the next matching event, waiting if the queue is empty.
    ///
    /// Returns `None` once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            // Register for wakeup before checking, so a push between the
            // check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if let Some(event) = self.inner.pop() {
                return Some(event);
            }
            if self.inner.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Receive the next matching event if one is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.inner.pop()
    }

    /// Drain every queued event without waiting.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut queue = self
            .inner
            .queue
            .lock()
            .expect("subscription queue poisoned");
        queue.drain(..).collect()
    }

    /// Number of events dropped to overflow so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Number of events currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .queue
            .lock()
            .expect("subscription queue poisoned")
            .len()
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the subscription. Idempotent; queued events remain readable.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether the subscription has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("queued", &self.len())
            .field("dropped", &self.dropped())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(delta: &str) -> Payload {
        Payload::TextChunk {
            delta: delta.to_owned(),
        }
    }

    #[tokio::test]
    async fn delivers_in_publication_order() {
        let bus = EventBus::new("a1");
        let mut sub = bus.subscribe([Channel::Progress]);

        bus.publish(text("one"));
        bus.publish(text("two"));
        bus.publish(Payload::Done);

        let first = sub.recv().await.expect("event");
        let second = sub.recv().await.expect("event");
        let third = sub.recv().await.expect("event");
        assert_eq!(first.event_type(), "text-chunk");
        assert_eq!(second.event_type(), "text-chunk");
        assert_eq!(third.event_type(), "done");
        assert!(first.seq < second.seq && second.seq < third.seq);
    }

    #[tokio::test]
    async fn channel_filter_applies() {
        let bus = EventBus::new("a1");
        let mut progress = bus.subscribe([Channel::Progress]);
        let mut monitor = bus.subscribe([Channel::Monitor]);

        bus.publish(text("hello"));
        bus.publish(Payload::StepComplete { step: 1 });

        assert_eq!(progress.recv().await.expect("event").event_type(), "text-chunk");
        assert_eq!(
            monitor.recv().await.expect("event").event_type(),
            "step-complete"
        );
        assert!(progress.try_recv().is_none());
        assert!(monitor.try_recv().is_none());
    }

    #[tokio::test]
    async fn event_type_filter_applies() {
        let bus = EventBus::new("a1");
        let mut sub = bus.subscribe_with(
            SubscribeOptions::channels([Channel::Progress]).event_types(["done"]),
        );

        bus.publish(text("ignored"));
        bus.publish(Payload::Done);

        let only = sub.recv().await.expect("event");
        assert_eq!(only.event_type(), "done");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let bus = EventBus::new("a1");
        let mut sub = bus.subscribe_with(
            SubscribeOptions::channels([Channel::Progress])
                .event_types(["text-chunk"])
                .capacity(4),
        );

        for i in 0..10 {
            bus.publish(text(&i.to_string()));
        }

        assert_eq!(sub.dropped(), 6);
        let remaining: Vec<String> = sub
            .drain()
            .into_iter()
            .map(|e| match e.payload {
                Payload::TextChunk { delta } => delta,
                _ => unreachable!("filtered to text chunks"),
            })
            .collect();
        assert_eq!(remaining, vec!["6", "7", "8", "9"]);
    }

    #[tokio::test]
    async fn overflow_emits_rate_limited_notice() {
        let bus = EventBus::new("a1");
        let tiny = bus.subscribe_with(SubscribeOptions::channels([Channel::Progress]).capacity(1));
        let mut monitor = bus.subscribe([Channel::Monitor]);

        for i in 0..5 {
            bus.publish(text(&i.to_string()));
        }

        let notice = monitor.recv().await.expect("notice");
        assert_eq!(notice.event_type(), "error");
        match notice.payload {
            Payload::Error { kind, .. } => assert_eq!(kind, "subscriber-overflow"),
            _ => unreachable!("monitor subscription"),
        }
        // Rate limit: the burst produced exactly one notice.
        assert!(monitor.try_recv().is_none());
        drop(tiny);
    }

    #[test]
    fn recv_wakes_on_publish() {
        use tokio_test::{assert_pending, assert_ready, task};

        let bus = EventBus::new("a1");
        let mut sub = bus.subscribe([Channel::Progress]);
        let mut recv = task::spawn(sub.recv());
        assert_pending!(recv.poll());

        bus.publish(text("wake"));
        assert!(recv.is_woken());
        let event = assert_ready!(recv.poll()).expect("event delivered");
        assert_eq!(event.event_type(), "text-chunk");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_drains() {
        let bus = EventBus::new("a1");
        let mut sub = bus.subscribe([Channel::Progress]);
        bus.publish(text("last"));

        sub.close();
        sub.close();
        assert!(sub.is_closed());

        // Queued events remain readable after close; then recv ends.
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_bus_publishes_nothing() {
        let bus = EventBus::new("a1");
        let mut sub = bus.subscribe([Channel::Progress]);
        bus.close();
        bus.publish(text("late"));
        assert!(sub.recv().await.is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn sequence_is_strictly_increasing_across_channels() {
        let bus = EventBus::new("a1");
        let mut all = bus.subscribe(Channel::ALL);

        bus.publish(text("a"));
        bus.publish(Payload::StepComplete { step: 1 });
        bus.publish(Payload::Done);

        let mut last = None;
        while let Some(event) = all.try_recv() {
            if let Some(prev) = last {
                assert!(event.seq > prev);
            }
            last = Some(event.seq);
        }
        assert_eq!(last, Some(2));
    }
}
