//! Error type for the fallible corners of the queue.
//!
//! The merge path itself never fails: an empty pop is `None`, and pushes to
//! unknown or closing channels are dropped. Errors surface only from strict
//! pushes, sampling setup and configuration loading.

use thiserror::Error;

/// Errors reported by `chronoq-core`.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A strict push named a channel that is not registered.
    #[error("unknown channel `{0}`")]
    UnknownChannel(String),

    /// A strict push targeted a channel that is closing.
    #[error("channel `{0}` is closing")]
    ChannelClosing(String),

    /// Sampling was requested with a rate of zero, or one so high the window is under 1 ns.
    #[error("sample rate must be between 1 and 1000000000 windows per second")]
    InvalidSampleRate,

    /// A sampling weight was NaN or infinite.
    #[error("weight for channel `{channel}` must be finite, got {weight}")]
    InvalidWeight { channel: String, weight: f64 },

    /// A background thread could not be started.
    #[error("failed to spawn background task: {0}")]
    Spawn(#[source] std::io::Error),

    /// Reading a configuration file failed.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration document did not parse.
    #[error("failed to parse config: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QueueError>;
