use super::connection::Connection;
use super::{close_quietly, Shared};
use crate::utils::error::PoolError;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Flow control handle handed to a [`FlowSubscriber`].
pub trait Subscription: Send + Sync {
    fn request(&self, n: u64);
    fn cancel(&self);
}

/// Receives what a [`DataChannel`](super::DataChannel) reads from its transport.
pub trait FlowSubscriber: Send + Sync {
    fn on_subscribe(&self, subscription: &dyn Subscription);
    fn on_data(&self, data: Bytes);
    fn on_error(&self, error: std::io::Error);
    fn on_complete(&self);
}

/// Supplies outgoing data to a [`DataChannel`](super::DataChannel).
pub trait FlowPublisher: Send + Sync {
    fn subscribe(&self, subscriber: &dyn FlowSubscriber);
}

/// Watchdog attached to a connection's data channel while it sits in the pool.
///
/// Nothing is expected to happen on an idle connection: any data, error or
/// completion takes the connection out of the pool and closes it. The
/// trigger fires at most once. It holds only weak references so that the
/// channel (owned by the connection) never keeps the connection or the pool
/// alive.
pub(crate) struct CleanupTrigger<C: Connection> {
    connection: Weak<C>,
    pool: Weak<Shared<C>>,
    done: AtomicBool,
}

impl<C: Connection> CleanupTrigger<C> {
    pub(crate) fn new(connection: &Arc<C>, pool: &Arc<Shared<C>>) -> Arc<Self> {
        Arc::new(Self {
            connection: Arc::downgrade(connection),
            pool: Arc::downgrade(pool),
            done: AtomicBool::new(false),
        })
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Win the one-shot flag for a path other than the trigger itself.
    ///
    /// Returns `false` if the trigger already fired, in which case its
    /// cleanup owns closing the connection.
    pub(crate) fn claim(&self) -> bool {
        !self.done.swap(true, Ordering::AcqRel)
    }

    fn trigger_cleanup(&self, error: Option<PoolError>) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => pool.cleanup(&connection, error),
            None => {
                debug!(key = %connection.cache_key(), "Pool gone, closing orphaned connection");
                close_quietly(connection.as_ref());
            }
        }
    }
}

// Nothing downstream reads through the trigger.
impl<C: Connection> Subscription for CleanupTrigger<C> {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {}
}

impl<C: Connection> FlowSubscriber for CleanupTrigger<C> {
    fn on_subscribe(&self, subscription: &dyn Subscription) {
        subscription.request(1);
    }

    fn on_data(&self, data: Bytes) {
        self.trigger_cleanup(Some(PoolError::UnexpectedData(data.len())));
    }

    fn on_error(&self, error: std::io::Error) {
        self.trigger_cleanup(Some(PoolError::Io(error)));
    }

    fn on_complete(&self) {
        self.trigger_cleanup(None);
    }
}

impl<C: Connection> FlowPublisher for CleanupTrigger<C> {
    fn subscribe(&self, subscriber: &dyn FlowSubscriber) {
        subscriber.on_subscribe(self);
    }
}

impl<C: Connection> fmt::Debug for CleanupTrigger<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupTrigger")
            .field("done", &self.is_done())
            .finish()
    }
}
