// keepalive-pool - Keep-alive connection pool for persistent client connections

pub mod config;
pub mod pool;
pub mod telemetry;
pub mod utils;

// Re-export commonly used types
pub use pool::{CacheKey, Connection, ConnectionPool, HostAddr, PoolStats, StreamConnection};
pub use utils::error::{PoolError, Result};
