//! [`Connection`] over a tokio byte stream.
//!
//! Works for a bare `TcpStream` as well as for a TLS stream layered on top of
//! one; the caller says which through the cache key's secure flag.

use super::connection::{Connection, DataChannel};
use super::key::CacheKey;
use super::trigger::{FlowPublisher, FlowSubscriber, Subscription};
use bytes::BytesMut;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

const WATCH_BUFFER_SIZE: usize = 1024;

/// A pooled stream. Use [`take_stream`](Self::take_stream) after acquiring it.
///
/// Dropping it without taking the stream closes the socket.
pub struct StreamConnection<S> {
    key: CacheKey,
    channel: StreamChannel<S>,
}

struct StreamChannel<S> {
    stream: Arc<Mutex<Option<S>>>,
    watcher: parking_lot::Mutex<Option<CancellationToken>>,
    closed: Arc<AtomicBool>,
}

/// Cancelling the subscription stops the watch without closing the stream.
struct WatchSubscription(CancellationToken);

impl Subscription for WatchSubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {
        self.0.cancel();
    }
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S, key: CacheKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            channel: StreamChannel {
                stream: Arc::new(Mutex::new(Some(stream))),
                watcher: parking_lot::Mutex::new(None),
                closed: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    /// Stop watching and hand the stream back. `None` once the connection was closed.
    pub async fn take_stream(&self) -> Option<S> {
        self.channel.stop_watching();
        self.channel.stream.lock().await.take()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.closed.load(Ordering::Acquire)
    }
}

impl<S> StreamChannel<S> {
    fn stop_watching(&self) {
        if let Some(token) = self.watcher.lock().take() {
            token.cancel();
        }
    }
}

impl<S> DataChannel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Idle connections write nothing, so the publisher is never polled.
    fn connect_flows(&self, _publisher: Arc<dyn FlowPublisher>, subscriber: Arc<dyn FlowSubscriber>) {
        self.stop_watching();

        let token = CancellationToken::new();
        subscriber.on_subscribe(&WatchSubscription(token.clone()));
        if token.is_cancelled() {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; idle connection will not be watched");
            return;
        };
        *self.watcher.lock() = Some(token.clone());

        let stream = Arc::clone(&self.stream);
        let closed = Arc::clone(&self.closed);
        handle.spawn(async move {
            let mut buf = BytesMut::with_capacity(WATCH_BUFFER_SIZE);
            let outcome = {
                let mut guard = stream.lock().await;
                let Some(io) = guard.as_mut() else {
                    return;
                };
                let read = tokio::select! {
                    _ = token.cancelled() => None,
                    result = io.read_buf(&mut buf) => Some(result),
                };
                let Some(result) = read else {
                    if closed.load(Ordering::Acquire) {
                        guard.take();
                    }
                    return;
                };
                // Whatever the read saw, the stream is no longer reusable.
                closed.store(true, Ordering::Release);
                guard.take();
                result
            };
            match outcome {
                Ok(0) => subscriber.on_complete(),
                Ok(n) => {
                    trace!(bytes = n, "Unexpected read on idle connection");
                    subscriber.on_data(buf.freeze());
                }
                Err(e) => subscriber.on_error(e),
            }
        });
    }
}

impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn cache_key(&self) -> CacheKey {
        self.key.clone()
    }

    fn is_secure(&self) -> bool {
        self.key.is_secure()
    }

    /// Dropping the stream closes the socket. If the watcher holds the
    /// stream right now it drops it on its way out.
    fn close(&self) -> std::io::Result<()> {
        self.channel.closed.store(true, Ordering::Release);
        self.channel.stop_watching();
        if let Ok(mut guard) = self.channel.stream.try_lock() {
            guard.take();
        }
        Ok(())
    }

    fn data_channel(&self) -> &dyn DataChannel {
        &self.channel
    }
}

impl<S> Drop for StreamConnection<S> {
    fn drop(&mut self) {
        self.channel.closed.store(true, Ordering::Release);
        self.channel.stop_watching();
    }
}

impl<S> fmt::Debug for StreamConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("key", &self.key)
            .field("closed", &self.channel.closed.load(Ordering::Acquire))
            .finish()
    }
}
