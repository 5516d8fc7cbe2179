use super::{Connection, ConnectionPool};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Drive [`ConnectionPool::purge`] from a background task.
///
/// After each purge the task sleeps until the next deadline, or for
/// `idle_interval` when nothing is scheduled. A release wakes it early so a
/// connection with a nearer deadline is not missed, and so does `stop`. The
/// task ends when `shutdown` is cancelled or the pool is stopped.
pub fn spawn_purge_task<C: Connection>(
    pool: ConnectionPool<C>,
    idle_interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if pool.is_stopped() {
                debug!("Pool stopped, purge task exiting");
                return;
            }

            let next = pool.purge();
            let wait = if next.is_zero() { idle_interval } else { next };
            trace!(wait_ms = wait.as_millis() as u64, "Next purge scheduled");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Purge task cancelled");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
                _ = pool.released() => {}
            }
        }
    })
}
