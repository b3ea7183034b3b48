//! Built-in feature modules.
//!
//! Add new modules by:
//! 1. Creating a new file in this directory
//! 2. Adding `pub mod your_module;` below
//! 3. Adding it to `builtin_modules()`

pub mod anvil;
pub mod chat_filter;
pub mod geo;
pub mod ranks;

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::ExpiringCache;
use crate::module::Module;

/// Every module shipped with the host, in registration order.
pub fn builtin_modules() -> Vec<Box<dyn Module>> {
    vec![
        Box::new(ranks::RanksModule::new()),
        Box::new(chat_filter::ChatFilterModule::new()),
        Box::new(anvil::AnvilModule::new()),
        Box::new(geo::GeoModule::new()),
    ]
}

/// Run a lookup off the event path and cache its outcome.
///
/// Failures are cached too, as error entries carrying the rendered error,
/// so the next caller gets an answer without hitting the backend again.
/// `on_done` receives the value or the error detail.
///
/// Returns `None` when called outside a Tokio runtime; nothing is cached then.
pub(crate) fn spawn_lookup<F, D>(
    cache: ExpiringCache<String, String>,
    key: String,
    lookup: F,
    on_done: D,
) -> Option<JoinHandle<()>>
where
    F: Future<Output = anyhow::Result<String>> + Send + 'static,
    D: FnOnce(Result<&str, &str>) + Send + 'static,
{
    let Ok(runtime) = Handle::try_current() else {
        warn!("No runtime available for lookup of {} in cache '{}'", key, cache.name());
        return None;
    };

    Some(runtime.spawn(async move {
        match lookup.await {
            Ok(value) => {
                debug!("Lookup of {} in '{}' succeeded", key, cache.name());
                cache.put_ok(key, value.clone());
                on_done(Ok(&value));
            }
            Err(e) => {
                let detail = format!("{:#}", e);
                warn!("Lookup of {} in '{}' failed: {}", key, cache.name(), detail);
                cache.put_error(key, detail.clone());
                on_done(Err(&detail));
            }
        }
    }))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::module::ModuleState;

    #[tokio::test]
    async fn test_spawn_lookup_caches_success_and_failure() {
        let cache: ExpiringCache<String, String> =
            ExpiringCache::new("lookups", CacheConfig::default());

        spawn_lookup(cache.clone(), "ok".into(), async { Ok("value".to_string()) }, |_| {})
            .unwrap()
            .await
            .unwrap();
        spawn_lookup(
            cache.clone(),
            "bad".into(),
            async { Err(anyhow::anyhow!("backend down")) },
            |result| assert_eq!(result, Err("backend down")),
        )
        .unwrap()
        .await
        .unwrap();

        assert_eq!(cache.get(&"ok".to_string()).as_deref(), Some("value"));
        let failed = cache.get_entry(&"bad".to_string()).unwrap();
        assert!(failed.is_error());
        assert_eq!(failed.value(), "backend down");
    }

    #[test]
    fn test_spawn_lookup_without_runtime_caches_nothing() {
        let cache: ExpiringCache<String, String> =
            ExpiringCache::new("lookups", CacheConfig::default());
        let handle = spawn_lookup(cache.clone(), "k".into(), async { Ok("v".to_string()) }, |_| {});

        assert!(handle.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_builtin_modules_enable_on_empty_config() {
        let (registry, _events, _replies) = testing::harness(serde_json::json!({}));
        for module in builtin_modules() {
            registry.register(module).unwrap();
        }

        assert!(registry.load_all().is_success());
        assert!(registry.enable_all().is_success());
        for (name, state) in registry.states() {
            assert_eq!(state, ModuleState::Enabled, "{name} not enabled");
        }

        assert!(registry.disable_all().is_success());
    }
}
