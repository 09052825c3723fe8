mod settings;

use std::time::Duration;

use rowpipe_error::{ErrorKind, ResultExt, RowpipeError, Result};
use serde::{Deserialize, Serialize};

pub use settings::PipelineSetting;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;
pub const DEFAULT_BATCH_QUANTUM: usize = 500;

/// Prefix for environment variables overriding settings.
pub const ENV_PREFIX: &str = "ROWPIPE_";

/// Configuration fixed for the duration of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of rows buffered in a single row channel.
    pub channel_capacity: usize,
    /// Number of rows read from one input channel before other inputs are
    /// peeked.
    pub batch_quantum: usize,
    /// If every row read is structurally checked against the first row.
    pub safe_mode: bool,
    /// If workers yield when an output channel is nearly full, or an input
    /// channel nearly empty.
    pub thread_priority_management: bool,
    /// Bound on a single blocking push attempt.
    pub push_timeout_ms: u64,
    /// Bound on a single blocking pop attempt.
    pub pop_timeout_ms: u64,
    /// Sleep interval while paused or waiting for the pipeline to start.
    pub pause_poll_ms: u64,
    /// How long a remote input keeps retrying to connect.
    pub remote_connect_timeout_ms: u64,
    /// How long a remote output waits for its peer to connect.
    pub remote_accept_timeout_ms: u64,
    /// Name of this host in a clustered run.
    pub slave_name: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            batch_quantum: DEFAULT_BATCH_QUANTUM,
            safe_mode: false,
            thread_priority_management: true,
            push_timeout_ms: 50,
            pop_timeout_ms: 1,
            pause_poll_ms: 1,
            remote_connect_timeout_ms: 30_000,
            remote_accept_timeout_ms: 30_000,
            slave_name: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(s)
            .context("Failed to parse pipeline config")
            .map_err(|e| e.with_kind(ErrorKind::InvalidConfig))?;
        config.validate()?;
        Ok(config)
    }

    /// Set a setting by name from its string representation.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let func = settings::lookup(name)?;
        (func.set)(value, self)
    }

    /// Get the string representation of a setting by name.
    pub fn get(&self, name: &str) -> Result<String> {
        let func = settings::lookup(name)?;
        Ok((func.get)(self))
    }

    /// Reset a setting to its default value.
    pub fn reset(&mut self, name: &str) -> Result<()> {
        let def_conf = Self::default();
        let func = settings::lookup(name)?;
        let value = (func.get)(&def_conf);
        (func.set)(&value, self)
    }

    /// Apply every `ROWPIPE_<NAME>` environment variable that names a known
    /// setting.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(std::env::vars())
    }

    fn apply_vars(&mut self, vars: impl IntoIterator<Item = (String, String)>) -> Result<()> {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let name = name.to_ascii_lowercase();
            if settings::exists(&name) {
                self.set(&name, &value)
                    .map_err(|e| e.with_field("env", key.clone()))?;
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(RowpipeError::new("Channel capacity must be greater than zero")
                .with_kind(ErrorKind::InvalidConfig));
        }
        if self.batch_quantum == 0 {
            return Err(RowpipeError::new("Batch quantum must be greater than zero")
                .with_kind(ErrorKind::InvalidConfig));
        }
        Ok(())
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }

    pub fn remote_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_connect_timeout_ms)
    }

    pub fn remote_accept_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_accept_timeout_ms)
    }

    /// Channel size above which a producer backs off.
    pub fn upper_buffer_boundary(&self) -> usize {
        (self.channel_capacity * 99) / 100
    }

    /// Channel size below which a consumer backs off.
    pub fn lower_buffer_boundary(&self) -> usize {
        self.channel_capacity / 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let mut conf = PipelineConfig::default();
        conf.set("channel_capacity", "250").unwrap();
        conf.set("safe_mode", "true").unwrap();
        conf.set("slave_name", "slave-1").unwrap();

        assert_eq!(250, conf.channel_capacity);
        assert!(conf.safe_mode);
        assert_eq!("250", conf.get("channel_capacity").unwrap());
        assert_eq!("slave-1", conf.get("slave_name").unwrap());

        conf.reset("channel_capacity").unwrap();
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, conf.channel_capacity);
    }

    #[test]
    fn unknown_setting() {
        let mut conf = PipelineConfig::default();
        let err = conf.set("does_not_exist", "1").unwrap_err();
        assert_eq!(ErrorKind::InvalidConfig, err.kind());
    }

    #[test]
    fn invalid_value() {
        let mut conf = PipelineConfig::default();
        let err = conf.set("batch_quantum", "lots").unwrap_err();
        assert_eq!(ErrorKind::InvalidConfig, err.kind());
    }

    #[test]
    fn env_vars_applied() {
        let mut conf = PipelineConfig::default();
        conf.apply_vars([
            ("ROWPIPE_BATCH_QUANTUM".to_string(), "7".to_string()),
            ("ROWPIPE_NOT_A_SETTING".to_string(), "x".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
        ])
        .unwrap();
        assert_eq!(7, conf.batch_quantum);
    }

    #[test]
    fn from_json_with_defaults() {
        let conf = PipelineConfig::from_json_str(r#"{"channel_capacity": 10, "safe_mode": true}"#)
            .unwrap();
        assert_eq!(10, conf.channel_capacity);
        assert!(conf.safe_mode);
        assert_eq!(DEFAULT_BATCH_QUANTUM, conf.batch_quantum);

        let err = PipelineConfig::from_json_str(r#"{"channel_capacity": 0}"#).unwrap_err();
        assert_eq!(ErrorKind::InvalidConfig, err.kind());
    }

    #[test]
    fn buffer_boundaries() {
        let conf = PipelineConfig {
            channel_capacity: 1000,
            ..Default::default()
        };
        assert_eq!(990, conf.upper_buffer_boundary());
        assert_eq!(10, conf.lower_buffer_boundary());
    }
}
