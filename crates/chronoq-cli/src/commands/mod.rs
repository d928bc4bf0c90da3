pub mod bench;
pub mod simulate;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chronoq_core::QueueConfig;

/// Parse a duration string like "5m", "30s", "1h", "100ms".
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        // Assume seconds
        (s, 1000)
    };

    let value: u64 = numeric
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{s}'"))?;
    Ok(Duration::from_millis(value.saturating_mul(multiplier)))
}

/// Split a comma-separated channel list, dropping blanks and duplicates.
pub fn parse_channels(s: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Parse `channel:weight` pairs separated by commas.
pub fn parse_weights(s: &str) -> Result<HashMap<String, f64>, String> {
    let mut weights = HashMap::new();
    for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((name, weight)) = pair.split_once(':') else {
            return Err(format!("malformed weight '{pair}' (expected channel:weight)"));
        };
        let weight: f64 = weight
            .trim()
            .parse()
            .map_err(|_| format!("invalid weight '{weight}' for channel '{name}'"))?;
        weights.insert(name.trim().to_string(), weight);
    }
    Ok(weights)
}

/// Load a queue config file, or start from defaults.
pub fn load_config(path: Option<&str>) -> Result<QueueConfig, String> {
    match path {
        Some(p) => QueueConfig::load(Path::new(p)).map_err(|e| format!("{p}: {e}")),
        None => Ok(QueueConfig::default()),
    }
}

/// Print an error and exit with status 1.
pub fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}
