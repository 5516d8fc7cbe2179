use super::key::CacheKey;
use super::trigger::{FlowPublisher, FlowSubscriber};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A transport connection that can sit idle in a [`ConnectionPool`](super::ConnectionPool).
///
/// The pool owns idle connections through `Arc<C>` and compares them by
/// pointer identity, so implementors don't need `PartialEq`.
pub trait Connection: Send + Sync + 'static {
    /// Key under which this connection is pooled.
    fn cache_key(&self) -> CacheKey;

    /// Whether the transport is encrypted. Must agree with `cache_key().is_secure()`.
    fn is_secure(&self) -> bool;

    /// Close the transport. Called at most once per pooled stint, never under the pool lock.
    fn close(&self) -> std::io::Result<()>;

    /// Duplex channel the pool watches while the connection is idle.
    fn data_channel(&self) -> &dyn DataChannel;
}

/// The read/write flow of a connection.
///
/// `connect_flows` replaces whatever was attached before: `subscriber`
/// receives everything read from the transport, `publisher` becomes the
/// source of outgoing data. Implementations may invoke `subscriber`
/// synchronously from inside `connect_flows`.
pub trait DataChannel: Send + Sync {
    fn connect_flows(&self, publisher: Arc<dyn FlowPublisher>, subscriber: Arc<dyn FlowSubscriber>);
}

/// Source of wall-clock time for release stamps and purge deadlines.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
