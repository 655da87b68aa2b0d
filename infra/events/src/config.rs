use crate::error::{BusError, BusErrorExt};
use config::{Config, Environment, File, Map};
use serde::Deserialize;
use std::path::Path;
use tokio::sync::Semaphore;
use tracing::info;

/// Default number of pending events accepted before `emit` suspends.
pub const DEFAULT_INBOUND_CAPACITY: usize = 128;
/// Default per-subscriber output queue capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 128;
const MIN_CAPACITY: usize = 1;
/// Tokio semaphores and bounded channels panic above this many permits.
const MAX_CAPACITY: usize = Semaphore::MAX_PERMITS;
const ENV_PREFIX: &str = "FANOUT";

/// Queue capacities of a bus.
///
/// Both capacities must be non-zero: a zero-sized inbound queue would make
/// every `emit` a rendezvous with the engine, and a zero-sized subscriber
/// queue would evict every subscriber on its first matching event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum number of emitted events waiting for the dispatch engine (M).
    pub inbound_capacity: usize,
    /// Default output queue capacity of each subscription (C).
    pub subscriber_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

impl BusConfig {
    /// Loads the configuration from a file, then overlays `FANOUT__*` environment variables.
    ///
    /// The file format is inferred from its extension (e.g. `fanout.toml`).
    /// Environment keys use a double underscore separator, so
    /// `FANOUT__INBOUND_CAPACITY=512` overrides `inbound_capacity`.
    /// Missing keys fall back to [`BusConfig::default`].
    ///
    /// # Errors
    /// Returns [`BusError::Config`] if the file is missing or malformed, and
    /// [`BusError::InvalidCapacity`] if a capacity is zero.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading bus configuration");
        Self::layered(Some(path), None)
    }

    /// Builds the configuration from `FANOUT__*` environment variables only.
    ///
    /// # Errors
    /// Returns [`BusError::Config`] on malformed values and
    /// [`BusError::InvalidCapacity`] if a capacity is zero.
    pub fn from_env() -> Result<Self, BusError> {
        Self::layered(None, None)
    }

    /// `env` replaces the process environment when set.
    fn layered(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self, BusError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true).source(env),
            )
            .build()
            .context("Failed to build bus config")?
            .try_deserialize::<Self>()
            .context("Failed to deserialize bus config")?;

        config.validate()?;
        Ok(config)
    }

    /// Checks that both capacities are non-zero and within Tokio's permit limit.
    ///
    /// # Errors
    /// Returns [`BusError::InvalidCapacity`] naming the offending field.
    pub fn validate(&self) -> Result<(), BusError> {
        validate_capacity(self.inbound_capacity).context("inbound_capacity")?;
        validate_capacity(self.subscriber_capacity).context("subscriber_capacity")?;
        Ok(())
    }
}

pub(crate) fn validate_capacity(capacity: usize) -> Result<usize, BusError> {
    if capacity < MIN_CAPACITY {
        return Err(BusError::InvalidCapacity {
            message: format!("capacity must be >= {MIN_CAPACITY}").into(),
            context: None,
        });
    }
    if capacity > MAX_CAPACITY {
        return Err(BusError::InvalidCapacity {
            message: format!("capacity {capacity} exceeds the maximum of {MAX_CAPACITY}").into(),
            context: None,
        });
    }
    Ok(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_non_zero() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.inbound_capacity, 128);
        assert_eq!(cfg.subscriber_capacity, 128);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let cfg = BusConfig { inbound_capacity: 4, subscriber_capacity: 0 };
        let err = cfg.validate().unwrap_err();

        assert!(matches!(err, BusError::InvalidCapacity { .. }));
        assert!(err.to_string().contains("subscriber_capacity"));
    }

    #[test]
    fn test_oversized_capacity_is_rejected() {
        let cfg = BusConfig { inbound_capacity: usize::MAX, subscriber_capacity: 4 };
        let err = cfg.validate().unwrap_err();

        assert!(matches!(err, BusError::InvalidCapacity { .. }));
        assert!(err.to_string().contains("inbound_capacity"));
        assert!(validate_capacity(MAX_CAPACITY).is_ok());
        assert!(validate_capacity(MAX_CAPACITY + 1).is_err());
    }

    fn env(vars: &[(&str, &str)]) -> Map<String, String> {
        vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::io::Write::write_all(&mut file, b"inbound_capacity = 4\nsubscriber_capacity = 8\n")
            .unwrap();

        let cfg = BusConfig::layered(
            Some(file.path()),
            Some(env(&[("FANOUT__INBOUND_CAPACITY", "512"), ("OTHER__SUBSCRIBER_CAPACITY", "1")])),
        )
        .unwrap();

        assert_eq!(cfg, BusConfig { inbound_capacity: 512, subscriber_capacity: 8 });
    }

    #[test]
    fn test_environment_only() {
        let cfg =
            BusConfig::layered(None, Some(env(&[("FANOUT__SUBSCRIBER_CAPACITY", "16")]))).unwrap();
        assert_eq!(cfg, BusConfig { subscriber_capacity: 16, ..BusConfig::default() });

        let err = BusConfig::layered(None, Some(env(&[("FANOUT__INBOUND_CAPACITY", "0")])))
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidCapacity { .. }));

        assert_eq!(BusConfig::layered(None, Some(Map::new())).unwrap(), BusConfig::default());
    }
}
