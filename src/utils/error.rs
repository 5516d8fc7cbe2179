use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data received while in pool ({0} bytes)")]
    UnexpectedData(usize),

    #[error("Connection closed by peer while in pool")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;
