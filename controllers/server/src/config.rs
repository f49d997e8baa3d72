//! Controller configuration, read from environment variables.

use crate::error::ControllerError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration for the Server Controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace to watch (`WATCH_NAMESPACE`); `None` watches all namespaces
    pub namespace: Option<String>,
    /// Maximum concurrent reconciliations (`RECONCILE_CONCURRENCY`)
    pub concurrency: u16,
    /// Quiet period after an event before reconciling (`RECONCILE_DEBOUNCE_SECS`)
    pub debounce: Duration,
    /// Startup limit for the Pod index's initial listing (`INDEX_SYNC_TIMEOUT_SECS`)
    pub index_sync_timeout: Duration,
    /// First error requeue delay in minutes (`ERROR_BACKOFF_MIN_MINUTES`)
    pub backoff_min_minutes: u64,
    /// Error requeue delay cap in minutes (`ERROR_BACKOFF_MAX_MINUTES`)
    pub backoff_max_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: 3,
            debounce: Duration::from_secs(1),
            index_sync_timeout: Duration::from_secs(30),
            backoff_min_minutes: 1,
            backoff_max_minutes: 10,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration from `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();

        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());
        let concurrency = parse_or(&lookup, "RECONCILE_CONCURRENCY", defaults.concurrency)?;
        let debounce_secs = parse_or(&lookup, "RECONCILE_DEBOUNCE_SECS", defaults.debounce.as_secs())?;
        let sync_secs = parse_or(
            &lookup,
            "INDEX_SYNC_TIMEOUT_SECS",
            defaults.index_sync_timeout.as_secs(),
        )?;
        let backoff_min_minutes =
            parse_or(&lookup, "ERROR_BACKOFF_MIN_MINUTES", defaults.backoff_min_minutes)?;
        let backoff_max_minutes =
            parse_or(&lookup, "ERROR_BACKOFF_MAX_MINUTES", defaults.backoff_max_minutes)?;

        if backoff_min_minutes == 0 || backoff_max_minutes < backoff_min_minutes {
            return Err(ControllerError::InvalidConfig(format!(
                "error backoff must satisfy 0 < min <= max, got min={backoff_min_minutes} max={backoff_max_minutes}"
            )));
        }

        Ok(Self {
            namespace,
            concurrency,
            debounce: Duration::from_secs(debounce_secs),
            index_sync_timeout: Duration::from_secs(sync_secs),
            backoff_min_minutes,
            backoff_max_minutes,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{key}={raw:?}: {e}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.namespace, None);
    }

    #[test]
    fn test_reads_all_keys() {
        let config = Config::from_lookup(lookup_from(&[
            ("WATCH_NAMESPACE", "games"),
            ("RECONCILE_CONCURRENCY", "8"),
            ("RECONCILE_DEBOUNCE_SECS", "0"),
            ("INDEX_SYNC_TIMEOUT_SECS", "90"),
            ("ERROR_BACKOFF_MIN_MINUTES", "2"),
            ("ERROR_BACKOFF_MAX_MINUTES", "20"),
        ]))
        .unwrap();

        assert_eq!(config.namespace.as_deref(), Some("games"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.debounce, Duration::ZERO);
        assert_eq!(config.index_sync_timeout, Duration::from_secs(90));
        assert_eq!(config.backoff_min_minutes, 2);
        assert_eq!(config.backoff_max_minutes, 20);
    }

    #[test]
    fn test_blank_namespace_means_all() {
        let config = Config::from_lookup(lookup_from(&[("WATCH_NAMESPACE", "  ")])).unwrap();
        assert_eq!(config.namespace, None);
    }

    #[test]
    fn test_rejects_unparseable_values() {
        let err = Config::from_lookup(lookup_from(&[("RECONCILE_CONCURRENCY", "lots")])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(msg) if msg.contains("RECONCILE_CONCURRENCY")));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let err = Config::from_lookup(lookup_from(&[
            ("ERROR_BACKOFF_MIN_MINUTES", "5"),
            ("ERROR_BACKOFF_MAX_MINUTES", "2"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }
}
