//! Coordinator configuration.

use std::time::Duration;

use crate::error::{CoreError, Result};

/// Environment variable for the default stage timeout in milliseconds.
pub const ENV_STAGE_TIMEOUT_MS: &str = "SWITCHBOARD_STAGE_TIMEOUT_MS";
/// Environment variable for the number of lines read back per session.
pub const ENV_READ_LINES: &str = "SWITCHBOARD_READ_LINES";
/// Environment variable enabling secret redaction of read-back output.
pub const ENV_REDACT: &str = "SWITCHBOARD_REDACT";
/// Environment variable for the output monitor poll interval in milliseconds.
pub const ENV_POLL_MS: &str = "SWITCHBOARD_POLL_MS";

/// Configuration for the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Default timeout for one playbook stage. `None` waits forever.
    pub stage_timeout: Option<Duration>,
    /// Lines of output collected per session during read-back.
    pub read_max_lines: usize,
    /// Saturation applied to every team color, in percent.
    pub color_saturation: f64,
    /// Lightness applied to every team color, in percent.
    pub color_lightness: f64,
    /// Redact secrets from read-back output.
    pub redact_output: bool,
    /// Capacity of the output monitor queue.
    pub output_queue_capacity: usize,
    /// How often the output monitor polls sessions.
    pub poll_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stage_timeout: None,
            read_max_lines: 50,
            color_saturation: 70.0,
            color_lightness: 50.0,
            redact_output: false,
            output_queue_capacity: 256,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl CoordinatorConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a config from defaults overridden by `SWITCHBOARD_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, ENV_STAGE_TIMEOUT_MS)? {
            config.stage_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(lines) = parse_var::<usize>(&lookup, ENV_READ_LINES)? {
            config.read_max_lines = lines;
        }
        if let Some(raw) = lookup(ENV_REDACT) {
            config.redact_output = parse_flag(ENV_REDACT, &raw)?;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_POLL_MS)? {
            if ms == 0 {
                return Err(CoreError::validation(format!("{} must be positive", ENV_POLL_MS)));
            }
            config.poll_interval = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Sets the default stage timeout.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    /// Sets how many lines are read back per session.
    pub fn with_read_max_lines(mut self, lines: usize) -> Self {
        self.read_max_lines = lines;
        self
    }

    /// Sets team color saturation and lightness.
    pub fn with_color(mut self, saturation: f64, lightness: f64) -> Self {
        self.color_saturation = saturation;
        self.color_lightness = lightness;
        self
    }

    /// Enables or disables redaction of read-back output.
    pub fn with_redaction(mut self, enabled: bool) -> Self {
        self.redact_output = enabled;
        self
    }

    /// Sets the output monitor queue capacity.
    pub fn with_output_queue_capacity(mut self, capacity: usize) -> Self {
        self.output_queue_capacity = capacity;
        self
    }

    /// Sets the output monitor poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| CoreError::validation(format!("invalid value for {}: '{}'", key, raw))),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(CoreError::validation(format!(
            "invalid value for {}: '{}'",
            key, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.stage_timeout, None);
        assert_eq!(config.read_max_lines, 50);
        assert_eq!(config.color_saturation, 70.0);
        assert_eq!(config.color_lightness, 50.0);
        assert!(!config.redact_output);
        assert_eq!(config.output_queue_capacity, 256);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_config_builder() {
        let config = CoordinatorConfig::new()
            .with_stage_timeout(Duration::from_secs(5))
            .with_read_max_lines(10)
            .with_color(60.0, 40.0)
            .with_redaction(true);

        assert_eq!(config.stage_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.read_max_lines, 10);
        assert_eq!(config.color_saturation, 60.0);
        assert!(config.redact_output);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CoordinatorConfig::from_lookup(lookup_from(&[
            (ENV_STAGE_TIMEOUT_MS, "1500"),
            (ENV_READ_LINES, "20"),
            (ENV_REDACT, "yes"),
            (ENV_POLL_MS, "100"),
        ]))
        .unwrap();

        assert_eq!(config.stage_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.read_max_lines, 20);
        assert!(config.redact_output);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = CoordinatorConfig::from_lookup(lookup_from(&[(ENV_READ_LINES, "lots")]));
        assert!(matches!(result, Err(CoreError::Validation(_))));

        let result = CoordinatorConfig::from_lookup(lookup_from(&[(ENV_REDACT, "maybe")]));
        assert!(matches!(result, Err(CoreError::Validation(_))));

        let result = CoordinatorConfig::from_lookup(lookup_from(&[(ENV_POLL_MS, "0")]));
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_zero_stage_timeout_disables() {
        let config =
            CoordinatorConfig::from_lookup(lookup_from(&[(ENV_STAGE_TIMEOUT_MS, "0")])).unwrap();
        assert_eq!(config.stage_timeout, None);
    }
}
