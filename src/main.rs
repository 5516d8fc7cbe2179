use anyhow::{bail, Context};
use clap::Parser;
use keepalive_pool::config::Config;
use keepalive_pool::pool::spawn_purge_task;
use keepalive_pool::telemetry::init_logging;
use keepalive_pool::{CacheKey, ConnectionPool, HostAddr, StreamConnection};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "poolprobe")]
#[command(about = "Exercise a keep-alive connection pool against a line-echo TCP endpoint", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Endpoint to probe (host:port)
    #[arg(long)]
    target: Option<String>,

    /// Number of sequential request/response rounds
    #[arg(long, default_value_t = 3)]
    requests: usize,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(config_path) = args.generate_config {
        println!("Generating example configuration file: {:?}", config_path);
        Config::create_example(&config_path)?;
        println!("Example configuration file created successfully!");
        return Ok(());
    }

    let mut config = match args.config {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading configuration from {:?}", path))?,
        None => Config::default(),
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging)?;

    let Some(target) = args.target else {
        bail!("--target is required");
    };
    let addr = tokio::net::lookup_host(&target)
        .await
        .with_context(|| format!("resolving {}", target))?
        .next()
        .with_context(|| format!("no address for {}", target))?;
    let host = target.rsplit_once(':').map_or(target.as_str(), |(host, _)| host);
    let destination = HostAddr::new(host, addr);
    let key = CacheKey::new(false, Some(destination.clone()), None);

    info!(
        "poolprobe v{} probing {} (keep-alive {}s)",
        env!("CARGO_PKG_VERSION"),
        destination,
        config.pool.keep_alive_secs
    );

    let pool: ConnectionPool<StreamConnection<TcpStream>> = ConnectionPool::new(config.pool.clone());
    let shutdown = CancellationToken::new();
    let purger = spawn_purge_task(pool.clone(), config.pool.purge_interval(), shutdown.clone());

    let mut reused = 0;
    for round in 0..args.requests {
        let pooled = pool.acquire(false, Some(destination.clone()), None);
        let stream = match pooled {
            Some(conn) => match conn.take_stream().await {
                Some(stream) => {
                    reused += 1;
                    stream
                }
                None => {
                    warn!("Pooled connection was already closed, dialing");
                    TcpStream::connect(addr).await?
                }
            },
            None => TcpStream::connect(addr)
                .await
                .with_context(|| format!("connecting to {}", addr))?,
        };

        let stream = round_trip(stream, round).await?;
        pool.release(StreamConnection::new(stream, key.clone()));
    }

    info!(requests = args.requests, reused, "Probe finished");
    println!("{}", serde_json::to_string_pretty(&pool.stats())?);

    pool.stop();
    shutdown.cancel();
    purger.await.ok();

    Ok(())
}

/// Send one line and wait for a full line back.
async fn round_trip(mut stream: TcpStream, round: usize) -> anyhow::Result<TcpStream> {
    stream
        .write_all(format!("poolprobe {}\n", round).as_bytes())
        .await?;

    let mut reply = Vec::new();
    let mut chunk = [0u8; 256];
    while !reply.contains(&b'\n') {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            bail!("peer closed the connection during round {}", round);
        }
        reply.extend_from_slice(&chunk[..n]);
    }
    info!(round, reply = %String::from_utf8_lossy(&reply).trim_end(), "Round trip complete");

    Ok(stream)
}
