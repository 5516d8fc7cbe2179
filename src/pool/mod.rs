//! Keep-alive connection pool.
//!
//! Idle connections live in one of two partitions (plain, secure) keyed by
//! [`CacheKey`], and in a single [`ExpiryList`](expiry::ExpiryList) ordered
//! by deadline. Both are guarded by one lock, which is never held while a
//! connection is closed. While idle, every connection's data channel is
//! watched by a [`CleanupTrigger`](trigger::CleanupTrigger) that reclaims it
//! as soon as anything arrives.

pub mod connection;
mod expiry;
pub mod key;
pub mod scheduler;
pub mod stream;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{Clock, Connection, DataChannel, SystemClock};
pub use key::{CacheKey, HostAddr};
pub use scheduler::spawn_purge_task;
pub use stream::StreamConnection;
pub use trigger::{FlowPublisher, FlowSubscriber, Subscription};

use crate::config::PoolConfig;
use crate::utils::error::PoolError;
use chrono::{DateTime, Utc};
use expiry::{ExpiryList, PurgeHint};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, trace};
use trigger::CleanupTrigger;

struct Idle<C: Connection> {
    connection: Arc<C>,
    trigger: Arc<CleanupTrigger<C>>,
}

type Partition<C> = HashMap<CacheKey, VecDeque<Idle<C>>>;

struct PoolState<C: Connection> {
    plain: Partition<C>,
    secure: Partition<C>,
    expiry: ExpiryList<C>,
    stopped: bool,
}

impl<C: Connection> PoolState<C> {
    fn partition_mut(&mut self, secure: bool) -> &mut Partition<C> {
        if secure {
            &mut self.secure
        } else {
            &mut self.plain
        }
    }

    fn put(&mut self, idle: Idle<C>) {
        let key = idle.connection.cache_key();
        self.partition_mut(idle.connection.is_secure())
            .entry(key)
            .or_default()
            .push_back(idle);
    }

    /// Pop the longest-pooled connection for `key`.
    fn pop(&mut self, key: &CacheKey) -> Option<Idle<C>> {
        let partition = self.partition_mut(key.is_secure());
        let list = partition.get_mut(key)?;
        let idle = list.pop_front();
        if list.is_empty() {
            partition.remove(key);
        }
        idle
    }

    /// Remove `connection` from the partition matching its own security flag.
    fn take(&mut self, connection: &Arc<C>) -> Option<Idle<C>> {
        let key = connection.cache_key();
        let partition = self.partition_mut(connection.is_secure());
        let list = partition.get_mut(&key)?;
        let at = list
            .iter()
            .position(|idle| Arc::ptr_eq(&idle.connection, connection));
        let idle = at.and_then(|at| list.remove(at));
        if list.is_empty() {
            partition.remove(&key);
        }
        idle
    }

    fn evict_oldest(&mut self) -> Option<Idle<C>> {
        let victim = self.expiry.remove_oldest()?;
        let idle = self.take(&victim);
        debug_assert!(idle.is_some(), "evicted connection missing from its partition");
        idle
    }

    fn idle_count(&self, secure: bool) -> usize {
        let partition = if secure { &self.secure } else { &self.plain };
        partition.values().map(VecDeque::len).sum()
    }
}

pub(crate) struct Shared<C: Connection> {
    state: Mutex<PoolState<C>>,
    hint: PurgeHint,
    released: Notify,
    config: PoolConfig,
    clock: Arc<dyn Clock>,
}

impl<C: Connection> Shared<C> {
    /// Take `connection` out of the pool, wherever it is, and close it.
    pub(crate) fn cleanup(&self, connection: &Arc<C>, error: Option<PoolError>) {
        let reason = error.unwrap_or(PoolError::ChannelClosed);
        debug!(key = %connection.cache_key(), reason = %reason, "Cleaning up idle connection");
        {
            let mut state = self.state.lock();
            if let Some(idle) = state.take(connection) {
                idle.trigger.claim();
            }
            state.expiry.remove(connection);
        }
        close_quietly(connection.as_ref());
    }
}

pub(super) fn close_quietly<C: Connection>(connection: &C) {
    if let Err(e) = connection.close() {
        debug!(key = %connection.cache_key(), error = %e, "Ignoring close failure");
    }
}

// Remaining deadlines are strictly in the future; never report them as zero.
fn millis_until(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Duration {
    Duration::from_millis((deadline - now).num_milliseconds().max(1) as u64)
}

/// Snapshot of the pool's occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Idle unencrypted connections
    pub plain_idle: usize,
    /// Idle encrypted connections
    pub secure_idle: usize,
    /// Distinct cache keys holding at least one idle connection
    pub keys: usize,
    /// Configured capacity (0 = unbounded)
    pub max_pool_size: usize,
    /// Configured keep-alive (seconds)
    pub keep_alive_secs: u64,
    /// Whether `stop` has been called
    pub stopped: bool,
}

impl PoolStats {
    pub fn total_idle(&self) -> usize {
        self.plain_idle + self.secure_idle
    }
}

/// Pool of idle keep-alive connections. There should be one per client.
///
/// Cloning is cheap and every clone refers to the same pool.
pub struct ConnectionPool<C: Connection> {
    shared: Arc<Shared<C>>,
}

impl<C: Connection> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connection> ConnectionPool<C> {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: PoolConfig, clock: Arc<dyn Clock>) -> Self {
        let expiry = ExpiryList::new();
        let hint = expiry.hint();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    plain: HashMap::new(),
                    secure: HashMap::new(),
                    expiry,
                    stopped: false,
                }),
                hint,
                released: Notify::new(),
                config,
                clock,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// Take an idle connection matching the request, if there is one.
    ///
    /// A plain connection through a proxy is keyed by the proxy alone: the
    /// tunnel does not depend on the destination.
    pub fn acquire(
        &self,
        secure: bool,
        destination: Option<HostAddr>,
        proxy: Option<SocketAddr>,
    ) -> Option<Arc<C>> {
        let destination = if secure || proxy.is_none() {
            destination
        } else {
            None
        };
        let key = CacheKey::new(secure, destination, proxy);

        let mut state = self.shared.state.lock();
        if state.stopped {
            return None;
        }
        while let Some(idle) = state.pop(&key) {
            let removed = state.expiry.remove(&idle.connection);
            debug_assert!(removed, "pooled connection had no expiry entry");
            // A trigger that already fired is closing this one; try the next.
            if idle.trigger.claim() {
                debug_assert_eq!(idle.connection.is_secure(), secure);
                trace!(%key, "Reusing pooled connection");
                return Some(idle.connection);
            }
        }
        None
    }

    /// Return a connection for reuse, stamped with the clock and the configured keep-alive.
    pub fn release(&self, connection: Arc<C>) {
        let now = self.shared.clock.now();
        let keep_alive = self.shared.config.keep_alive();
        self.release_at(connection, now, keep_alive);
    }

    /// Return a connection that stays reusable until `now` (whole seconds) + `keep_alive`.
    pub fn release_at(&self, connection: Arc<C>, now: DateTime<Utc>, keep_alive: Duration) {
        debug_assert_eq!(
            connection.is_secure(),
            connection.cache_key().is_secure(),
            "connection security disagrees with its cache key"
        );

        if self.is_stopped() {
            close_quietly(connection.as_ref());
            return;
        }

        // Subscribing may call straight back into the pool, so it must
        // happen before the lock is taken.
        let trigger = self.register_cleanup_trigger(&connection);
        let key = connection.cache_key();

        let evicted = {
            let mut state = self.shared.state.lock();
            if trigger.is_done() {
                trace!(%key, "Connection failed before it was pooled");
                return;
            }
            if state.stopped {
                drop(state);
                if trigger.claim() {
                    close_quietly(connection.as_ref());
                }
                return;
            }

            let max = self.shared.config.max_pool_size;
            let evicted = if max > 0 && state.expiry.len() >= max {
                state.evict_oldest()
            } else {
                None
            };

            state.expiry.insert(Arc::clone(&connection), now, keep_alive);
            state.put(Idle {
                connection,
                trigger,
            });
            evicted.filter(|victim| victim.trigger.claim())
        };

        trace!(%key, "Returned connection to pool");
        self.shared.released.notify_one();

        if let Some(victim) = evicted {
            debug!(
                key = %victim.connection.cache_key(),
                "Maximum pool size reached: removing oldest connection"
            );
            close_quietly(victim.connection.as_ref());
        }
    }

    fn register_cleanup_trigger(&self, connection: &Arc<C>) -> Arc<CleanupTrigger<C>> {
        let trigger = CleanupTrigger::new(connection, &self.shared);
        trace!(key = %connection.cache_key(), "Registering cleanup trigger");
        connection
            .data_channel()
            .connect_flows(trigger.clone(), trigger.clone());
        trigger
    }

    /// Purge expired connections using the pool clock.
    ///
    /// Skips the lock entirely when the pool is known to be empty.
    pub fn purge(&self) -> Duration {
        if !self.shared.hint.maybe_required() {
            return Duration::ZERO;
        }
        self.purge_at(self.shared.clock.now())
    }

    /// Close every connection whose deadline is at or before `now`.
    ///
    /// Returns the time until the next deadline, truncated to milliseconds,
    /// or zero when no connection is left to expire.
    pub fn purge_at(&self, now: DateTime<Utc>) -> Duration {
        // Releases racing with us only add entries that cannot be expired yet.
        if !self.shared.hint.maybe_required() {
            return Duration::ZERO;
        }

        let (expired, next) = {
            let mut state = self.shared.state.lock();
            let mut expired = Vec::new();
            for connection in state.expiry.purge_until(now) {
                let idle = state.take(&connection);
                debug_assert!(idle.is_some(), "expired connection missing from its partition");
                expired.extend(idle.filter(|idle| idle.trigger.claim()));
            }
            (expired, state.expiry.next_deadline())
        };

        if !expired.is_empty() {
            debug!(count = expired.len(), "Purged expired connections");
        }
        for idle in &expired {
            close_quietly(idle.connection.as_ref());
        }

        next.map(|deadline| millis_until(now, deadline))
            .unwrap_or(Duration::ZERO)
    }

    /// Stop pooling: drain and close everything. Later releases are closed
    /// immediately and acquisitions always miss.
    pub fn stop(&self) {
        let drained: Vec<Idle<C>> = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            state.stopped = true;
            let expiring = state.expiry.drain();
            let drained: Vec<Idle<C>> = state
                .plain
                .drain()
                .chain(state.secure.drain())
                .flat_map(|(_, list)| list)
                .collect();
            debug_assert_eq!(expiring.len(), drained.len());
            drained
        };

        let to_close: Vec<Idle<C>> = drained
            .into_iter()
            .filter(|idle| idle.trigger.claim())
            .collect();
        info!(closed = to_close.len(), "Connection pool stopped");
        // Let the purge task see the stop instead of sleeping it out.
        self.shared.released.notify_one();
        for idle in &to_close {
            close_quietly(idle.connection.as_ref());
        }
    }

    /// Remove `connection` from the pool, if still there, and close it.
    ///
    /// This is what a cleanup trigger calls; `error` is what it observed, or
    /// `None` when the peer closed the channel.
    pub fn cleanup(&self, connection: &Arc<C>, error: Option<PoolError>) {
        self.shared.cleanup(connection, error);
    }

    /// Whether `connection` is currently idle in either partition.
    pub fn contains(&self, connection: &Arc<C>) -> bool {
        let key = connection.cache_key();
        let state = self.shared.state.lock();
        [&state.plain, &state.secure].iter().any(|partition| {
            partition
                .get(&key)
                .is_some_and(|list| list.iter().any(|idle| Arc::ptr_eq(&idle.connection, connection)))
        })
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            plain_idle: state.idle_count(false),
            secure_idle: state.idle_count(true),
            keys: state.plain.len() + state.secure.len(),
            max_pool_size: self.shared.config.max_pool_size,
            keep_alive_secs: self.shared.config.keep_alive_secs,
            stopped: state.stopped,
        }
    }

    /// Wait until a connection is released into the pool or the pool stops.
    pub(crate) async fn released(&self) {
        self.shared.released.notified().await;
    }
}
