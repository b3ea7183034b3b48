//! Cache module - expiring lookup caches owned by feature modules.
//!
//! Modules that perform repeatable, slow or rate-limited lookups (geolocation,
//! rank records) keep the result in an [`ExpiringCache`], including failed
//! lookups, so a remote service is not hammered on every event.
//!
//! ## Usage
//!
//! ```rust
//! let countries: ExpiringCache<String, String> =
//!     ExpiringCache::new("geo", CacheConfig::remote_lookup());
//!
//! countries.put_ok("8.8.8.8".to_string(), "United States".to_string());
//! match countries.get_entry(&ip) {
//!     Some(entry) if entry.is_error() => { /* we tried and failed */ }
//!     Some(entry) => { /* entry.value() */ }
//!     None => { /* never tried, or expired */ }
//! }
//! ```

mod clock;
mod config;
mod expiring;

#[cfg(test)]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use config::CacheConfig;
pub use expiring::{CacheEntry, CacheError, ExpiringCache};
