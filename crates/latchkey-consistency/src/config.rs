//! HA configuration
//!
//! Backends receive their settings as a flat string map from the host, or load
//! them from a file overlaid with `LATCHKEY_*` environment variables. Durations
//! accept `"500ms"`, `"15s"`, `"1m"`, `"1h"` or a bare number of seconds.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};

use latchkey_common::{DEFAULT_PARALLEL_OPERATIONS, parse_duration};

use crate::error::ConfigError;
use crate::lock::{
    DEFAULT_LOCK_TTL, DEFAULT_RENEW_INTERVAL, DEFAULT_RETRY_INTERVAL, DEFAULT_WATCH_INTERVAL,
    DEFAULT_WATCH_MAX_FAILURES, LockOptions,
};

pub const HA_ENABLED: &str = "ha_enabled";
pub const MAX_PARALLEL: &str = "max_parallel";
pub const LOCK_TTL: &str = "lock_ttl";
pub const LOCK_RENEW_INTERVAL: &str = "lock_renew_interval";
pub const LOCK_RETRY_INTERVAL: &str = "lock_retry_interval";
pub const LOCK_WATCH_INTERVAL: &str = "lock_watch_interval";
pub const LOCK_WATCH_MAX_FAILURES: &str = "lock_watch_max_failures";

/// Prefix of environment variables read by [`HaConfiguration::load`]
pub const ENV_PREFIX: &str = "LATCHKEY";

/// HA settings of a storage backend
#[derive(Clone, Debug, Default)]
pub struct HaConfiguration {
    pub config: Config,
}

impl HaConfiguration {
    /// Build from the flat key/value map a host hands to its backend
    pub fn from_map<I, K, V>(values: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut builder = Config::builder();
        for (key, value) in values {
            builder = builder.set_override(key.as_ref(), value.as_ref())?;
        }
        Self::from_config(builder.build()?)
    }

    /// Load from an optional file, then `LATCHKEY_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        Self::from_config(builder.build()?)
    }

    /// Wrap an already built [`Config`], validating it
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let configuration = Self { config };
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ha_enabled()?;
        self.max_parallel()?;
        self.lock_options()?;
        Ok(())
    }

    fn raw(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.config.get_string(key) {
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(config::ConfigError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn duration(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.raw(key)? {
            None => Ok(default),
            Some(value) => match parse_duration(&value) {
                Some(d) if !d.is_zero() => Ok(d),
                Some(_) => Err(ConfigError::invalid(key, "must be greater than zero")),
                None => Err(ConfigError::invalid(key, format!("'{value}' is not a duration"))),
            },
        }
    }

    pub fn ha_enabled(&self) -> Result<bool, ConfigError> {
        match self.raw(HA_ENABLED)?.map(|v| v.to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) => match v.as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" | "" => Ok(false),
                _ => Err(ConfigError::invalid(HA_ENABLED, format!("'{v}' is not a boolean"))),
            },
        }
    }

    /// Size of the concurrency gate in front of the store
    pub fn max_parallel(&self) -> Result<usize, ConfigError> {
        match self.raw(MAX_PARALLEL)? {
            None => Ok(DEFAULT_PARALLEL_OPERATIONS),
            Some(v) => match v.parse::<usize>() {
                Ok(n) if n >= 1 => Ok(n),
                _ => Err(ConfigError::invalid(MAX_PARALLEL, "must be a positive integer")),
            },
        }
    }

    pub fn lock_options(&self) -> Result<LockOptions, ConfigError> {
        let watch_max_failures = match self.raw(LOCK_WATCH_MAX_FAILURES)? {
            None => DEFAULT_WATCH_MAX_FAILURES,
            Some(v) => match v.parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::invalid(
                        LOCK_WATCH_MAX_FAILURES,
                        "must be a positive integer",
                    ));
                }
            },
        };

        let options = LockOptions {
            renew_interval: self.duration(LOCK_RENEW_INTERVAL, DEFAULT_RENEW_INTERVAL)?,
            retry_interval: self.duration(LOCK_RETRY_INTERVAL, DEFAULT_RETRY_INTERVAL)?,
            ttl: self.duration(LOCK_TTL, DEFAULT_LOCK_TTL)?,
            watch_interval: self.duration(LOCK_WATCH_INTERVAL, DEFAULT_WATCH_INTERVAL)?,
            watch_max_failures,
        };

        if options.renew_interval >= options.ttl {
            return Err(ConfigError::invalid(
                LOCK_RENEW_INTERVAL,
                format!("must be shorter than {LOCK_TTL}"),
            ));
        }

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HaConfiguration::from_map(Vec::<(&str, &str)>::new()).unwrap();
        assert!(!config.ha_enabled().unwrap());
        assert_eq!(config.max_parallel().unwrap(), DEFAULT_PARALLEL_OPERATIONS);
        assert_eq!(config.lock_options().unwrap(), LockOptions::default());
    }

    #[test]
    fn test_from_map() {
        let map: HashMap<&str, &str> = HashMap::from([
            (HA_ENABLED, "true"),
            (MAX_PARALLEL, "16"),
            (LOCK_TTL, "30s"),
            (LOCK_RENEW_INTERVAL, "10s"),
            (LOCK_RETRY_INTERVAL, "500ms"),
            (LOCK_WATCH_INTERVAL, "2"),
            (LOCK_WATCH_MAX_FAILURES, "3"),
        ]);
        let config = HaConfiguration::from_map(map).unwrap();

        assert!(config.ha_enabled().unwrap());
        assert_eq!(config.max_parallel().unwrap(), 16);
        let options = config.lock_options().unwrap();
        assert_eq!(options.ttl, Duration::from_secs(30));
        assert_eq!(options.renew_interval, Duration::from_secs(10));
        assert_eq!(options.retry_interval, Duration::from_millis(500));
        assert_eq!(options.watch_interval, Duration::from_secs(2));
        assert_eq!(options.watch_max_failures, 3);
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            (HA_ENABLED, "maybe"),
            (MAX_PARALLEL, "0"),
            (MAX_PARALLEL, "many"),
            (LOCK_TTL, "forever"),
            (LOCK_RETRY_INTERVAL, "0s"),
            (LOCK_WATCH_MAX_FAILURES, "0"),
        ];
        for (key, value) in cases {
            let err = HaConfiguration::from_map([(key, value)]).unwrap_err();
            match err {
                ConfigError::Invalid { key: k, .. } => assert_eq!(k, key),
                other => panic!("unexpected error for {key}={value}: {other}"),
            }
        }
    }

    #[test]
    fn test_renew_must_be_shorter_than_ttl() {
        let err = HaConfiguration::from_map([(LOCK_TTL, "5s"), (LOCK_RENEW_INTERVAL, "5s")])
            .unwrap_err();
        assert!(err.to_string().contains(LOCK_RENEW_INTERVAL));
    }

    #[test]
    fn test_load_file_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "ha_enabled = true").unwrap();
        writeln!(file, "lock_ttl = \"20s\"").unwrap();
        writeln!(file, "max_parallel = 8").unwrap();

        let config = HaConfiguration::load(Some(file.path())).unwrap();
        assert!(config.ha_enabled().unwrap());
        assert_eq!(config.max_parallel().unwrap(), 8);
        assert_eq!(config.lock_options().unwrap().ttl, Duration::from_secs(20));

        // SAFETY: no other test in this crate reads LATCHKEY_* variables
        unsafe { std::env::set_var("LATCHKEY_MAX_PARALLEL", "4") };
        let config = HaConfiguration::load(Some(file.path()));
        unsafe { std::env::remove_var("LATCHKEY_MAX_PARALLEL") };
        assert_eq!(config.unwrap().max_parallel().unwrap(), 4);
    }
}
