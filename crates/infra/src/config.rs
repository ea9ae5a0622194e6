//! Environment-driven configuration for the worker and API processes.
//!
//! Every setting has a default suitable for local development; only
//! `DATABASE_URL` is required, and only in persistent mode.

use std::time::Duration;

use vendorflow_core::VendorChannel;

use crate::dispatch::DispatcherConfig;
use crate::work_queue::{DEFAULT_DLQ_KEY, DEFAULT_GROUP, DEFAULT_STREAM_KEY, QueueSettings};

/// Upper bound on how long a callback vendor may take.
pub const MAX_ASYNC_DEADLINE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("http client setup failed: {0}")]
    Client(String),
}

/// Outbound vendor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorConfig {
    pub sync_url: String,
    pub async_url: String,
    pub sync_calls_per_second: f64,
    pub async_calls_per_second: f64,
    pub timeout: Duration,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            sync_url: "http://localhost:8001".to_string(),
            async_url: "http://localhost:8002".to_string(),
            sync_calls_per_second: 5.0,
            async_calls_per_second: 3.0,
            timeout: Duration::from_secs(30),
        }
    }
}

impl VendorConfig {
    pub fn base_url(&self, channel: VendorChannel) -> &str {
        match channel {
            VendorChannel::Sync => &self.sync_url,
            VendorChannel::Async => &self.async_url,
        }
    }

    pub fn calls_per_second(&self, channel: VendorChannel) -> f64 {
        match channel {
            VendorChannel::Sync => self.sync_calls_per_second,
            VendorChannel::Async => self.async_calls_per_second,
        }
    }
}

/// Everything a worker process needs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub database_url: Option<String>,
    pub queue: QueueSettings,
    pub dispatcher: DispatcherConfig,
    pub vendors: VendorConfig,
    pub deadline_sweep_interval: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let consumer = env
            .string("CONSUMER_NAME")
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::now_v7()));

        let queue = QueueSettings {
            stream_key: env.string_or("QUEUE_STREAM", DEFAULT_STREAM_KEY),
            group: env.string_or("QUEUE_GROUP", DEFAULT_GROUP),
            dlq_key: env.string_or("QUEUE_DLQ", DEFAULT_DLQ_KEY),
            consumer,
        };

        let defaults = DispatcherConfig::default();
        let dispatcher = DispatcherConfig {
            block: env.positive_millis("QUEUE_BLOCK_MS", defaults.block)?,
            claim_timeout: env.millis("CLAIM_TIMEOUT_MS", defaults.claim_timeout)?,
            max_deliveries: env.parsed("MAX_DELIVERIES", defaults.max_deliveries)?,
            reclaim_interval: env.millis("RECLAIM_INTERVAL_MS", defaults.reclaim_interval)?,
            async_deadline: env.secs_at_most(
                "ASYNC_DEADLINE_SECS",
                defaults.async_deadline,
                MAX_ASYNC_DEADLINE,
            )?,
            callback_base_url: env.string_or("API_URL", &defaults.callback_base_url),
            ..defaults
        };

        let vendor_defaults = VendorConfig::default();
        let vendors = VendorConfig {
            sync_url: env.string_or("VENDOR_SYNC_URL", &vendor_defaults.sync_url),
            async_url: env.string_or("VENDOR_ASYNC_URL", &vendor_defaults.async_url),
            sync_calls_per_second: env
                .rate("SYNC_CALLS_PER_SECOND", vendor_defaults.sync_calls_per_second)?,
            async_calls_per_second: env
                .rate("ASYNC_CALLS_PER_SECOND", vendor_defaults.async_calls_per_second)?,
            timeout: env.secs("VENDOR_TIMEOUT_SECS", vendor_defaults.timeout)?,
        };

        Ok(Self {
            redis_url: env.string_or("REDIS_URL", "redis://localhost:6379"),
            database_url: env.string("DATABASE_URL"),
            queue,
            dispatcher,
            vendors,
            deadline_sweep_interval: env
                .positive_millis("DEADLINE_SWEEP_INTERVAL_MS", Duration::from_secs(10))?,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

/// API process settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// Postgres + Redis when true; in-process store, queue and dispatcher otherwise
    pub use_persistent_stores: bool,
    /// Channel for intake requests that do not name one
    pub default_channel: VendorChannel,
    pub worker: WorkerConfig,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let default_channel = match env.string("DEFAULT_CHANNEL") {
            None => VendorChannel::Sync,
            Some(raw) => raw.parse::<VendorChannel>().map_err(|e| {
                ConfigError::Invalid {
                    name: "DEFAULT_CHANNEL",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?,
        };

        Ok(Self {
            bind_addr: env.string_or("BIND_ADDR", "0.0.0.0:8000"),
            use_persistent_stores: env.flag("USE_PERSISTENT_STORES")?,
            default_channel,
            worker: WorkerConfig::from_lookup(&lookup)?,
        })
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, name: &str, default: &str) -> String {
        self.string(name).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn millis(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parsed(name, default_ms).map(Duration::from_millis)
    }

    fn secs(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parsed(name, default.as_secs()).map(Duration::from_secs)
    }

    fn positive_millis(
        &self,
        name: &'static str,
        default: Duration,
    ) -> Result<Duration, ConfigError> {
        let value = self.millis(name, default)?;
        if value.is_zero() {
            return Err(ConfigError::Invalid {
                name,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn secs_at_most(
        &self,
        name: &'static str,
        default: Duration,
        max: Duration,
    ) -> Result<Duration, ConfigError> {
        let value = self.secs(name, default)?;
        if value > max {
            return Err(ConfigError::Invalid {
                name,
                value: value.as_secs().to_string(),
                reason: format!("must be at most {} seconds", max.as_secs()),
            });
        }
        Ok(value)
    }

    fn rate(&self, name: &'static str, default: f64) -> Result<f64, ConfigError> {
        let rate: f64 = self.parsed(name, default)?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::Invalid {
                name,
                value: rate.to_string(),
                reason: "must be a positive number".to_string(),
            });
        }
        Ok(rate)
    }

    fn flag(&self, name: &'static str) -> Result<bool, ConfigError> {
        match self.string(name).map(|v| v.to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(ConfigError::Invalid {
                name,
                value: v,
                reason: "expected true or false".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.queue.stream_key, DEFAULT_STREAM_KEY);
        assert_eq!(config.queue.group, DEFAULT_GROUP);
        assert!(config.queue.consumer.starts_with("worker-"));
        assert_eq!(config.dispatcher.block, Duration::from_millis(1000));
        assert_eq!(config.dispatcher.max_deliveries, 5);
        assert_eq!(config.vendors.sync_calls_per_second, 5.0);
        assert_eq!(config.vendors.async_calls_per_second, 3.0);
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("CONSUMER_NAME", "worker-7"),
            ("CLAIM_TIMEOUT_MS", "2500"),
            ("ASYNC_DEADLINE_SECS", "12"),
            ("SYNC_CALLS_PER_SECOND", "0.5"),
            ("DATABASE_URL", "postgres://localhost/vendorflow"),
        ]))
        .unwrap();

        assert_eq!(config.queue.consumer, "worker-7");
        assert_eq!(config.dispatcher.claim_timeout, Duration::from_millis(2500));
        assert_eq!(config.dispatcher.async_deadline, Duration::from_secs(12));
        assert_eq!(config.vendors.sync_calls_per_second, 0.5);
        assert_eq!(
            config.require_database_url().unwrap(),
            "postgres://localhost/vendorflow"
        );
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[("MAX_DELIVERIES", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "MAX_DELIVERIES", .. }));

        let err =
            WorkerConfig::from_lookup(lookup(&[("ASYNC_CALLS_PER_SECOND", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ASYNC_CALLS_PER_SECOND", .. }));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for name in ["QUEUE_BLOCK_MS", "DEADLINE_SWEEP_INTERVAL_MS"] {
            let err = WorkerConfig::from_lookup(lookup(&[(name, "0")])).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { name: n, .. } if n == name));
        }
    }

    #[test]
    fn callback_deadline_is_bounded() {
        let err = WorkerConfig::from_lookup(lookup(&[("ASYNC_DEADLINE_SECS", "9000000000000")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ASYNC_DEADLINE_SECS", .. }));

        let max = MAX_ASYNC_DEADLINE.as_secs().to_string();
        let config =
            WorkerConfig::from_lookup(lookup(&[("ASYNC_DEADLINE_SECS", max.as_str())])).unwrap();
        assert_eq!(config.dispatcher.async_deadline, MAX_ASYNC_DEADLINE);
    }

    #[test]
    fn api_settings() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("USE_PERSISTENT_STORES", "TRUE"),
            ("DEFAULT_CHANNEL", "async"),
        ]))
        .unwrap();
        assert!(config.use_persistent_stores);
        assert_eq!(config.default_channel, VendorChannel::Async);
        assert_eq!(config.bind_addr, "0.0.0.0:8000");

        let err = ApiConfig::from_lookup(lookup(&[("DEFAULT_CHANNEL", "pigeon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "DEFAULT_CHANNEL", .. }));
    }
}
