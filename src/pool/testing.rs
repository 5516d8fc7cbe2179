//! In-memory connection with a hand-driven data channel, for unit tests.

use super::connection::{Clock, Connection, DataChannel};
use super::key::{CacheKey, HostAddr};
use super::trigger::{FlowPublisher, FlowSubscriber, Subscription};
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) fn plain_key(port: u16) -> CacheKey {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    CacheKey::new(false, Some(HostAddr::new("localhost", addr)), None)
}

pub(crate) fn secure_key(host: &str, port: u16) -> CacheKey {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    CacheKey::new(true, Some(HostAddr::new(host, addr)), None)
}

#[derive(Default)]
pub(crate) struct MockChannel {
    subscriber: Mutex<Option<Arc<dyn FlowSubscriber>>>,
    requested: AtomicU64,
    publisher_subscribed: AtomicBool,
    complete_on_connect: AtomicBool,
}

struct Probe<'a>(&'a MockChannel);

impl Subscription for Probe<'_> {
    fn request(&self, n: u64) {
        self.0.requested.fetch_add(n, Ordering::SeqCst);
    }

    fn cancel(&self) {}
}

impl FlowSubscriber for Probe<'_> {
    fn on_subscribe(&self, subscription: &dyn Subscription) {
        self.0.publisher_subscribed.store(true, Ordering::SeqCst);
        subscription.request(1);
    }

    fn on_data(&self, _data: Bytes) {}

    fn on_error(&self, _error: io::Error) {}

    fn on_complete(&self) {}
}

impl MockChannel {
    pub(crate) fn requested(&self) -> u64 {
        self.requested.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribed_to_publisher(&self) -> bool {
        self.publisher_subscribed.load(Ordering::SeqCst)
    }

    /// Make the next `connect_flows` report completion before returning.
    pub(crate) fn complete_on_connect(&self) {
        self.complete_on_connect.store(true, Ordering::SeqCst);
    }

    fn subscriber(&self) -> Option<Arc<dyn FlowSubscriber>> {
        self.subscriber.lock().clone()
    }

    pub(crate) fn push_data(&self, data: Bytes) {
        if let Some(subscriber) = self.subscriber() {
            subscriber.on_data(data);
        }
    }

    pub(crate) fn fail(&self, error: io::Error) {
        if let Some(subscriber) = self.subscriber() {
            subscriber.on_error(error);
        }
    }

    pub(crate) fn complete(&self) {
        if let Some(subscriber) = self.subscriber() {
            subscriber.on_complete();
        }
    }
}

impl DataChannel for MockChannel {
    fn connect_flows(&self, publisher: Arc<dyn FlowPublisher>, subscriber: Arc<dyn FlowSubscriber>) {
        *self.subscriber.lock() = Some(subscriber.clone());
        subscriber.on_subscribe(&Probe(self));
        publisher.subscribe(&Probe(self));
        if self.complete_on_connect.swap(false, Ordering::SeqCst) {
            subscriber.on_complete();
        }
    }
}

pub(crate) struct MockConnection {
    key: CacheKey,
    channel: MockChannel,
    closes: AtomicUsize,
    fail_close: AtomicBool,
}

impl MockConnection {
    pub(crate) fn plain(key: CacheKey) -> Arc<Self> {
        assert!(!key.is_secure());
        Self::with_key(key)
    }

    pub(crate) fn secure(key: CacheKey) -> Arc<Self> {
        assert!(key.is_secure());
        Self::with_key(key)
    }

    fn with_key(key: CacheKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            channel: MockChannel::default(),
            closes: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
        })
    }

    pub(crate) fn channel(&self) -> &MockChannel {
        &self.channel
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }
}

impl Connection for MockConnection {
    fn cache_key(&self) -> CacheKey {
        self.key.clone()
    }

    fn is_secure(&self) -> bool {
        self.key.is_secure()
    }

    fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(io::Error::other("close failed"));
        }
        Ok(())
    }

    fn data_channel(&self) -> &dyn DataChannel {
        &self.channel
    }
}

/// Clock that only moves when told to.
pub(crate) struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub(crate) fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(start)))
    }

    pub(crate) fn advance(&self, by: ChronoDuration) {
        let mut now = self.0.lock();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}
