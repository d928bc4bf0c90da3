//! Queue configuration, loadable from JSON.
//!
//! ```json
//! {
//!   "channels": ["camera_left", "camera_right", "imu"],
//!   "drain_poll_ms": 10,
//!   "idle_wait_us": 1000,
//!   "sampling": { "rate": 25, "weights": { "imu": 1.0, "camera_left": 0.5 } }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};

/// Windowed sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Output windows per second. The window length is `1 / rate` seconds.
    pub rate: u32,
    /// Per-channel score weights. Channels without a weight score zero.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
}

impl SamplingConfig {
    /// Window length in nanoseconds for this rate.
    pub fn window_ns(&self) -> Result<i64> {
        window_ns(self.rate)
    }
}

/// Window length in nanoseconds for `rate` windows per second.
///
/// Rates whose window would be shorter than one nanosecond are rejected.
pub fn window_ns(rate: u32) -> Result<i64> {
    if rate == 0 {
        return Err(QueueError::InvalidSampleRate);
    }
    let seconds = 1.0 / f64::from(rate);
    let window = (seconds * 1_000_000_000.0) as i64;
    if window < 1 {
        return Err(QueueError::InvalidSampleRate);
    }
    Ok(window)
}

/// Check that every weight is a finite number.
pub fn validate_weights(weights: &HashMap<String, f64>) -> Result<()> {
    match weights.iter().find(|(_, w)| !w.is_finite()) {
        Some((channel, weight)) => Err(QueueError::InvalidWeight {
            channel: channel.clone(),
            weight: *weight,
        }),
        None => Ok(()),
    }
}

/// Construction-time settings for a `TemporalQueue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Channels created up front.
    pub channels: Vec<String>,
    /// How often a close-drain task re-checks a closing channel, in milliseconds.
    pub drain_poll_ms: u64,
    /// How long the sampling task waits for a push after an empty pop, in microseconds.
    pub idle_wait_us: u64,
    /// Start sampling immediately with these parameters.
    pub sampling: Option<SamplingConfig>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            drain_poll_ms: 10,
            idle_wait_us: 1000,
            sampling: None,
        }
    }
}

impl QueueConfig {
    /// Parse a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject sampling settings that can never run.
    pub fn validate(&self) -> Result<()> {
        if let Some(sampling) = &self.sampling {
            sampling.window_ns()?;
            validate_weights(&sampling.weights)?;
        }
        Ok(())
    }

    /// Close-drain poll interval. Never zero.
    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms.max(1))
    }

    /// Sampler idle wait. Never zero.
    pub fn idle_wait(&self) -> Duration {
        Duration::from_micros(self.idle_wait_us.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert!(config.channels.is_empty());
        assert!(config.sampling.is_none());
        assert_eq!(config.drain_poll(), Duration::from_millis(10));
        assert_eq!(config.idle_wait(), Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_window_ns_from_rate() {
        assert_eq!(window_ns(1).unwrap(), 1_000_000_000);
        assert_eq!(window_ns(10).unwrap(), 100_000_000);
        assert_eq!(window_ns(25).unwrap(), 40_000_000);
        assert!(matches!(window_ns(0), Err(QueueError::InvalidSampleRate)));
    }

    #[test]
    fn test_parse_partial_document_uses_defaults() {
        let config = QueueConfig::from_json_str(r#"{ "channels": ["a", "b"] }"#).unwrap();
        assert_eq!(config.channels, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(config.drain_poll_ms, 10);
        assert!(config.sampling.is_none());
    }

    #[test]
    fn test_parse_sampling_section() {
        let config = QueueConfig::from_json_str(
            r#"{ "sampling": { "rate": 10, "weights": { "a": 1.0 } } }"#,
        )
        .unwrap();
        let sampling = config.sampling.unwrap();
        assert_eq!(sampling.rate, 10);
        assert_eq!(sampling.weights.get("a"), Some(&1.0));
    }

    #[test]
    fn test_sampling_weights_default_empty() {
        let config = QueueConfig::from_json_str(r#"{ "sampling": { "rate": 5 } }"#).unwrap();
        assert!(config.sampling.unwrap().weights.is_empty());
    }

    #[test]
    fn test_zero_rate_rejected() {
        let err = QueueConfig::from_json_str(r#"{ "sampling": { "rate": 0 } }"#).unwrap_err();
        assert!(matches!(err, QueueError::InvalidSampleRate));
    }

    #[test]
    fn test_rate_above_one_per_nanosecond_rejected() {
        assert_eq!(window_ns(1_000_000_000).unwrap(), 1);
        assert!(matches!(
            window_ns(1_000_000_001),
            Err(QueueError::InvalidSampleRate)
        ));
        assert!(matches!(window_ns(u32::MAX), Err(QueueError::InvalidSampleRate)));
    }

    #[test]
    fn test_non_finite_weight_rejected() {
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), f64::NAN);
        let err = validate_weights(&weights).unwrap_err();
        assert!(matches!(err, QueueError::InvalidWeight { ref channel, .. } if channel == "a"));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = QueueConfig::from_json_str("{ channels: ").unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "channels": ["x"], "drain_poll_ms": 0 }}"#).unwrap();
        let config = QueueConfig::load(file.path()).unwrap();
        assert_eq!(config.channels, vec!["x".to_string()]);
        // Zero is clamped so the drain task never spins.
        assert_eq!(config.drain_poll(), Duration::from_millis(1));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = QueueConfig::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, QueueError::Io(_)));
    }
}
