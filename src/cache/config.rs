//! Cache configuration.

use std::time::Duration;

use crate::config::ConfigSource;
use crate::utils::parse_duration;

/// Configuration for a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub capacity: usize,

    /// Time-to-live for cache entries, measured from insertion.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Set capacity (builder pattern).
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set time-to-live for cache entries.
    #[must_use]
    pub fn ttl(mut self, duration: Duration) -> Self {
        self.ttl = duration;
        self
    }

    /// Config for remote lookups that are slow or rate limited.
    /// Moderate capacity, long TTL.
    pub fn remote_lookup() -> Self {
        Self {
            capacity: 2_000,
            ttl: Duration::from_secs(1800), // 30 minutes
        }
    }

    /// Config for data consulted on every chat message.
    /// High capacity, short TTL so edits show up quickly.
    pub fn per_message() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(120), // 2 minutes
        }
    }

    /// Read `<path>.capacity` and `<path>.ttl` from config, falling back to `default`.
    ///
    /// `ttl` may be integer seconds or a duration string such as `10m`.
    pub fn from_source(config: &dyn ConfigSource, path: &str, default: CacheConfig) -> Self {
        let capacity = config.get_int(&format!("{path}.capacity"), default.capacity as i64);
        let capacity = usize::try_from(capacity).unwrap_or(default.capacity);

        let ttl_path = format!("{path}.ttl");
        let ttl = match config.get_int(&ttl_path, -1) {
            secs if secs >= 0 => Duration::from_secs(secs as u64),
            _ => parse_duration(&config.get_string(&ttl_path, "")).unwrap_or(default.ttl),
        };

        Self { capacity, ttl }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JsonConfig;
    use serde_json::json;

    #[test]
    fn test_from_source_reads_section() {
        let config = JsonConfig::from_value(json!({
            "geo": { "cache": { "capacity": 50, "ttl": "10m" } }
        }));

        let cache = CacheConfig::from_source(&config, "geo.cache", CacheConfig::default());
        assert_eq!(cache.capacity, 50);
        assert_eq!(cache.ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_from_source_numeric_ttl_and_defaults() {
        let config = JsonConfig::from_value(json!({
            "ranks": { "cache": { "ttl": 45, "capacity": -3 } }
        }));

        let cache = CacheConfig::from_source(&config, "ranks.cache", CacheConfig::with_capacity(7));
        assert_eq!(cache.capacity, 7);
        assert_eq!(cache.ttl, Duration::from_secs(45));

        let missing = CacheConfig::from_source(&config, "nothing", CacheConfig::remote_lookup());
        assert_eq!(missing, CacheConfig::remote_lookup());
    }

    #[test]
    fn test_from_source_malformed_values_fall_back() {
        for ttl in ["5µ", "40000000000000w", "soon", ""] {
            let config = JsonConfig::from_value(json!({ "geo": { "cache": { "ttl": ttl } } }));
            let cache =
                CacheConfig::from_source(&config, "geo.cache", CacheConfig::remote_lookup());
            assert_eq!(cache.ttl, Duration::from_secs(1800), "ttl {ttl:?}");
        }

        let config = JsonConfig::from_value(json!({
            "geo": { "cache": { "capacity": i64::MAX, "ttl": true } }
        }));
        let cache = CacheConfig::from_source(&config, "geo.cache", CacheConfig::remote_lookup());
        assert_eq!(cache.capacity, i64::MAX as usize);
        assert_eq!(cache.ttl, Duration::from_secs(1800));
    }
}
