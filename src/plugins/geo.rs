//! Geolocation module - `/country <ip>` with cached lookups.
//!
//! Both answers and failures are cached, so a flaky or rate-limited
//! resolver is consulted at most once per address per TTL. The reply tells
//! "we tried and failed" apart from "looking it up now".

use std::any::Any;
use std::net::IpAddr;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use tracing::info;

use super::spawn_lookup;
use crate::cache::{CacheConfig, ExpiringCache};
use crate::config::ConfigSource;
use crate::module::{Module, ModuleContext};
use crate::utils::{apply_fillings, format_duration};

pub const NAME: &str = "geo";

/// Resolves an address to a country name.
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, ip: IpAddr) -> BoxFuture<'static, anyhow::Result<String>>;
}

/// Resolver backed by the `geo.table` config section (`"ip": "Country"`).
pub struct TableResolver {
    config: Arc<dyn ConfigSource>,
}

impl TableResolver {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self { config }
    }
}

impl GeoResolver for TableResolver {
    fn resolve(&self, ip: IpAddr) -> BoxFuture<'static, anyhow::Result<String>> {
        let result = if is_private(&ip) {
            Err(anyhow::anyhow!("{} is a private or local address", ip))
        } else {
            self.config
                .get_section("geo.table")
                .get(&ip.to_string())
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| anyhow::anyhow!("no location known for {}", ip))
        };
        Box::pin(future::ready(result))
    }
}

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

pub struct GeoModule {
    resolver: Option<Arc<dyn GeoResolver>>,
    cache: Option<ExpiringCache<String, String>>,
}

impl GeoModule {
    /// Geolocation from the configured table.
    pub fn new() -> Self {
        Self {
            resolver: None,
            cache: None,
        }
    }

    #[allow(dead_code)]
    pub fn with_resolver(resolver: Arc<dyn GeoResolver>) -> Self {
        Self {
            resolver: Some(resolver),
            cache: None,
        }
    }

    /// Live cache entries, or `None` while disabled.
    #[allow(dead_code)]
    pub fn cached_lookups(&self) -> Option<usize> {
        self.cache.as_ref().map(ExpiringCache::size)
    }
}

impl Default for GeoModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for GeoModule {
    fn name(&self) -> &str {
        NAME
    }

    fn on_load(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        if self.resolver.is_none() {
            self.resolver = Some(Arc::new(TableResolver::new(Arc::clone(&ctx.config))));
        }
        Ok(())
    }

    fn on_enable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let resolver = self
            .resolver
            .clone()
            .ok_or_else(|| anyhow::anyhow!("geo resolver missing, module was never loaded"))?;

        let default = CacheConfig::remote_lookup();
        let cache_config = CacheConfig::from_source(ctx.config.as_ref(), "geo.cache", default);
        let cache: ExpiringCache<String, String> = ExpiringCache::new(NAME, cache_config);
        info!(
            "Geolocation cache ready ({} entries max, ttl {})",
            cache.capacity(),
            format_duration(cache.ttl())
        );

        let config = Arc::clone(&ctx.config);
        let commands = cache.clone();
        ctx.events.on_command(&ctx.module, "country", move |cmd| {
            let Some(input) = cmd.args.first() else {
                cmd.reply(message(config.as_ref(), "usage", &[]));
                return Ok(());
            };
            let Ok(ip) = input.parse::<IpAddr>() else {
                cmd.reply(message(config.as_ref(), "invalid", &[("input", input.as_str())]));
                return Ok(());
            };
            let key = ip.to_string();

            match commands.get_entry(&key) {
                Some(entry) if entry.is_error() => {
                    let fillings = [("ip", key.as_str()), ("error", entry.value().as_str())];
                    cmd.reply(message(config.as_ref(), "failed", &fillings));
                }
                Some(entry) => {
                    let fillings = [("ip", key.as_str()), ("country", entry.value().as_str())];
                    cmd.reply(message(config.as_ref(), "located", &fillings));
                }
                None => {
                    cmd.reply(message(config.as_ref(), "pending", &[("ip", key.as_str())]));

                    let outbox = cmd.outbox().clone();
                    let sender = cmd.sender.clone();
                    let config = Arc::clone(&config);
                    let ip_text = key.clone();
                    spawn_lookup(commands.clone(), key, resolver.resolve(ip), move |result| {
                        let text = match result {
                            Ok(country) => {
                                let fillings = [("ip", ip_text.as_str()), ("country", country)];
                                message(config.as_ref(), "located", &fillings)
                            }
                            Err(error) => {
                                let fillings = [("ip", ip_text.as_str()), ("error", error)];
                                message(config.as_ref(), "failed", &fillings)
                            }
                        };
                        outbox.send(sender, text);
                    });
                }
            }
            Ok(())
        })?;

        self.cache = Some(cache);
        Ok(())
    }

    fn on_disable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        ctx.events.release(&ctx.module);
        if let Some(cache) = self.cache.take() {
            cache.invalidate_all();
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Render `geo.messages.<key>`, falling back to the built-in text.
fn message(config: &dyn ConfigSource, key: &str, fillings: &[(&str, &str)]) -> String {
    let default = match key {
        "usage" => "Usage: /country <ip>",
        "invalid" => "'{input}' is not a valid IP address.",
        "pending" => "Looking up {ip}...",
        "located" => "{ip} is located in {country}.",
        "failed" => "Could not locate {ip}: {error}",
        _ => "",
    };
    let template = config.get_string(&format!("geo.messages.{}", key), default);
    apply_fillings(&template, fillings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::{harness, next_reply};
    use crate::utils::parse_command;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> serde_json::Value {
        json!({
            "geo": {
                "table": { "8.8.8.8": "United States", "81.2.69.160": "United Kingdom" },
                "cache": { "capacity": 16, "ttl": "10m" },
                "messages": { "located": "{ip} -> {country}" }
            }
        })
    }

    /// Counts resolver calls, answering from the table.
    struct Counting {
        inner: TableResolver,
        calls: Arc<AtomicUsize>,
    }

    impl GeoResolver for Counting {
        fn resolve(&self, ip: IpAddr) -> BoxFuture<'static, anyhow::Result<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve(ip)
        }
    }

    #[tokio::test]
    async fn test_lookup_then_cached_answer() {
        let (registry, events, mut replies) = harness(config());
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = Counting {
            inner: TableResolver::new(Arc::new(crate::config::JsonConfig::from_value(config()))),
            calls: Arc::clone(&calls),
        };
        registry.register(Box::new(GeoModule::with_resolver(Arc::new(resolver)))).unwrap();
        registry.load_all();
        registry.enable_all();

        let country = parse_command("/country 8.8.8.8").unwrap();
        events.dispatch_command("alice", &country).unwrap();
        assert_eq!(next_reply(&mut replies).await.text, "Looking up 8.8.8.8...");
        assert_eq!(next_reply(&mut replies).await.text, "8.8.8.8 -> United States");

        events.dispatch_command("alice", &country).unwrap();
        assert_eq!(next_reply(&mut replies).await.text, "8.8.8.8 -> United States");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_cached_and_reported_differently() {
        let (registry, events, mut replies) = harness(config());
        registry.register(Box::new(GeoModule::new())).unwrap();
        registry.load_all();
        registry.enable_all();

        let private = parse_command("/country 10.0.0.1").unwrap();
        events.dispatch_command("alice", &private).unwrap();
        assert_eq!(next_reply(&mut replies).await.text, "Looking up 10.0.0.1...");
        assert_eq!(
            next_reply(&mut replies).await.text,
            "Could not locate 10.0.0.1: 10.0.0.1 is a private or local address"
        );

        events.dispatch_command("alice", &private).unwrap();
        assert!(next_reply(&mut replies).await.text.starts_with("Could not locate 10.0.0.1"));

        let unknown = registry.get_module(NAME).unwrap().with(|g: &GeoModule| g.cached_lookups());
        assert_eq!(unknown, Some(Some(1)));
    }

    #[tokio::test]
    async fn test_bad_input_and_disable() {
        let (registry, events, mut replies) = harness(config());
        registry.register(Box::new(GeoModule::new())).unwrap();
        registry.load_all();
        registry.enable_all();

        events.dispatch_command("bob", &parse_command("/country").unwrap()).unwrap();
        assert_eq!(next_reply(&mut replies).await.text, "Usage: /country <ip>");

        events.dispatch_command("bob", &parse_command("/country banana").unwrap()).unwrap();
        assert_eq!(next_reply(&mut replies).await.text, "'banana' is not a valid IP address.");

        registry.disable_all();
        let country = parse_command("/country 8.8.8.8").unwrap();
        assert!(events.dispatch_command("bob", &country).is_err());
        let lookups = registry.get_module(NAME).unwrap().with(|g: &GeoModule| g.cached_lookups());
        assert_eq!(lookups, Some(None));
    }

    #[test]
    fn test_malformed_cache_config_still_enables() {
        for cache in [
            json!({ "ttl": "5µ" }),
            json!({ "ttl": "40000000000000w" }),
            json!({ "capacity": i64::MAX, "ttl": "10m" }),
        ] {
            let (registry, _events, _replies) = harness(json!({ "geo": { "cache": cache } }));
            registry.register(Box::new(GeoModule::new())).unwrap();
            registry.load_all();

            assert!(registry.enable_all().is_success(), "cache config {cache}");
            assert_eq!(registry.state(NAME), Some(crate::module::ModuleState::Enabled));
        }
    }
}
