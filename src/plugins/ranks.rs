//! Ranks module - player rank lookups with caching.
//!
//! Rank records live in an external store; every answer (including a failed
//! fetch) is cached so chat formatting doesn't hit the store per message.

use std::any::Any;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use serde_json::Value;
use tracing::{debug, info};

use super::spawn_lookup;
use crate::cache::{CacheConfig, ExpiringCache};
use crate::config::ConfigSource;
use crate::module::{Module, ModuleContext};
use crate::utils::apply_fillings;

pub const NAME: &str = "ranks";

/// Where rank records come from.
pub trait RankStore: Send + Sync {
    /// Fetch the rank name of a player.
    fn fetch_rank(&self, player: &str) -> BoxFuture<'static, anyhow::Result<String>>;
}

/// Rank store backed by the `ranks.players` config section.
///
/// Players without a record get `ranks.default-rank`. A record that is not
/// a string is reported as malformed.
pub struct ConfigRankStore {
    config: Arc<dyn ConfigSource>,
}

impl ConfigRankStore {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self { config }
    }
}

impl RankStore for ConfigRankStore {
    fn fetch_rank(&self, player: &str) -> BoxFuture<'static, anyhow::Result<String>> {
        let players = self.config.get_section("ranks.players");
        let result = match players.get(player) {
            Some(Value::String(rank)) => Ok(rank.clone()),
            Some(other) => Err(anyhow::anyhow!("malformed rank record for {}: {}", player, other)),
            None => Ok(self.config.get_string("ranks.default-rank", "member")),
        };
        Box::pin(future::ready(result))
    }
}

/// Tracks player ranks and prefixes chat lines with them.
pub struct RanksModule {
    store: Option<Arc<dyn RankStore>>,
    cache: Option<ExpiringCache<String, String>>,
}

impl RanksModule {
    /// Ranks read from configuration.
    pub fn new() -> Self {
        Self {
            store: None,
            cache: None,
        }
    }

    /// Ranks read from a custom store.
    #[allow(dead_code)]
    pub fn with_store(store: Arc<dyn RankStore>) -> Self {
        Self {
            store: Some(store),
            cache: None,
        }
    }

    /// The cached rank of a player, if a successful lookup is still fresh.
    ///
    /// Never triggers a fetch.
    pub fn cached_rank(&self, player: &str) -> Option<String> {
        self.cache.as_ref()?.get(&player.to_string())
    }
}

impl Default for RanksModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for RanksModule {
    fn name(&self) -> &str {
        NAME
    }

    fn on_load(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        if self.store.is_none() {
            self.store = Some(Arc::new(ConfigRankStore::new(Arc::clone(&ctx.config))));
        }
        Ok(())
    }

    fn on_enable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| anyhow::anyhow!("rank store missing, module was never loaded"))?;

        let default = CacheConfig::per_message();
        let cache_config = CacheConfig::from_source(ctx.config.as_ref(), "ranks.cache", default);
        let cache: ExpiringCache<String, String> = ExpiringCache::new(NAME, cache_config);

        {
            let cache = cache.clone();
            let store = Arc::clone(&store);
            let config = Arc::clone(&ctx.config);
            ctx.events.on_chat(&ctx.module, move |msg| {
                if !config.get_bool("ranks.chat-prefix", true) {
                    return Ok(());
                }

                match cache.get_entry(&msg.sender) {
                    Some(entry) if !entry.is_error() => {
                        let format = config.get_string("ranks.prefix-format", "[{rank}]");
                        let rank = entry.value().as_str();
                        msg.prefix = Some(apply_fillings(&format, &[("rank", rank)]));
                    }
                    Some(_) => {}
                    None => {
                        let fetch = store.fetch_rank(&msg.sender);
                        spawn_lookup(cache.clone(), msg.sender.clone(), fetch, |_| {});
                    }
                }
                Ok(())
            });
        }

        {
            let cache = cache.clone();
            let store = Arc::clone(&store);
            let config = Arc::clone(&ctx.config);
            ctx.events.on_command(&ctx.module, "rank", move |cmd| {
                let player = cmd.args.first().cloned().unwrap_or_else(|| cmd.sender.clone());
                let who = player.as_str();

                match cache.get_entry(&player) {
                    Some(entry) if !entry.is_error() => {
                        let rank = entry.value().as_str();
                        let fillings = [("player", who), ("rank", rank)];
                        cmd.reply(message(config.as_ref(), "rank", &fillings));
                    }
                    Some(entry) => {
                        let error = entry.value().as_str();
                        let fillings = [("player", who), ("error", error)];
                        cmd.reply(message(config.as_ref(), "failed", &fillings));
                    }
                    None => {
                        cmd.reply(message(config.as_ref(), "pending", &[("player", who)]));

                        let outbox = cmd.outbox().clone();
                        let sender = cmd.sender.clone();
                        let config = Arc::clone(&config);
                        let fetch = store.fetch_rank(who);
                        let who = player.clone();
                        spawn_lookup(cache.clone(), player, fetch, move |result| {
                            let who = who.as_str();
                            let text = match result {
                                Ok(rank) => {
                                    let fillings = [("player", who), ("rank", rank)];
                                    message(config.as_ref(), "rank", &fillings)
                                }
                                Err(error) => {
                                    let fillings = [("player", who), ("error", error)];
                                    message(config.as_ref(), "failed", &fillings)
                                }
                            };
                            outbox.send(sender, text);
                        });
                    }
                }
                Ok(())
            })?;
        }

        info!("Rank cache ready ({} entries max, ttl {:?})", cache.capacity(), cache.ttl());
        self.cache = Some(cache);
        Ok(())
    }

    fn on_disable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        ctx.events.release(&ctx.module);
        if let Some(cache) = self.cache.take() {
            cache.invalidate_all();
        }
        debug!("Rank cache dropped");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Render `ranks.messages.<key>`, falling back to the built-in text.
fn message(config: &dyn ConfigSource, key: &str, fillings: &[(&str, &str)]) -> String {
    let default = match key {
        "pending" => "Looking up {player}...",
        "rank" => "{player} is ranked {rank}.",
        "failed" => "Rank lookup for {player} failed: {error}",
        _ => "",
    };
    let template = config.get_string(&format!("ranks.messages.{}", key), default);
    apply_fillings(&template, fillings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChatMessage;
    use crate::plugins::testing::{harness, next_reply, wait_until};
    use crate::utils::parse_command;
    use serde_json::json;

    fn config() -> Value {
        json!({
            "ranks": {
                "players": { "alice": "admin", "mallory": 42 },
                "cache": { "capacity": 100, "ttl": "1m" }
            }
        })
    }

    fn cached(registry: &crate::module::ModuleRegistry, player: &str) -> Option<String> {
        registry
            .get_module(NAME)
            .and_then(|h| h.with(|r: &RanksModule| r.cached_rank(player)))
            .flatten()
    }

    #[tokio::test]
    async fn test_chat_prefix_after_first_lookup() {
        let (registry, events, _replies) = harness(config());
        registry.register(Box::new(RanksModule::new())).unwrap();
        registry.load_all();
        assert!(registry.enable_all().is_success());

        let mut first = ChatMessage::new("alice", "hello");
        events.dispatch_chat(&mut first);
        assert_eq!(first.prefix, None);

        wait_until(|| cached(&registry, "alice").is_some()).await;

        let mut second = ChatMessage::new("alice", "hello again");
        events.dispatch_chat(&mut second);
        assert_eq!(second.render(), "[admin] alice: hello again");
    }

    #[tokio::test]
    async fn test_rank_command_distinguishes_failure_from_first_lookup() {
        let (registry, events, mut replies) = harness(config());
        registry.register(Box::new(RanksModule::new())).unwrap();
        registry.load_all();
        registry.enable_all();

        events.dispatch_command("console", &parse_command("/rank bob").unwrap()).unwrap();
        assert_eq!(next_reply(&mut replies).await.text, "Looking up bob...");
        assert_eq!(next_reply(&mut replies).await.text, "bob is ranked member.");

        events.dispatch_command("console", &parse_command("/rank bob").unwrap()).unwrap();
        assert_eq!(next_reply(&mut replies).await.text, "bob is ranked member.");

        events.dispatch_command("console", &parse_command("/rank mallory").unwrap()).unwrap();
        assert_eq!(next_reply(&mut replies).await.text, "Looking up mallory...");
        assert!(next_reply(&mut replies).await.text.starts_with("Rank lookup for mallory failed"));

        events.dispatch_command("console", &parse_command("/rank mallory").unwrap()).unwrap();
        let cached = next_reply(&mut replies).await;
        assert_eq!(cached.recipient, "console");
        assert!(cached.text.contains("malformed rank record"));
    }

    #[tokio::test]
    async fn test_disable_drops_cache_and_handlers() {
        let (registry, events, _replies) = harness(config());
        registry.register(Box::new(RanksModule::new())).unwrap();
        registry.load_all();
        registry.enable_all();

        events.dispatch_chat(&mut ChatMessage::new("alice", "hi"));
        wait_until(|| cached(&registry, "alice").is_some()).await;

        registry.disable_all();
        assert_eq!(cached(&registry, "alice"), None);
        assert_eq!(events.registrations(NAME), 0);

        registry.enable_all();
        assert_eq!(cached(&registry, "alice"), None);
    }

    #[tokio::test]
    async fn test_custom_store() {
        struct Fixed;

        impl RankStore for Fixed {
            fn fetch_rank(&self, _player: &str) -> BoxFuture<'static, anyhow::Result<String>> {
                Box::pin(async { Ok("vip".to_string()) })
            }
        }

        let (registry, events, _replies) = harness(json!({}));
        registry.register(Box::new(RanksModule::with_store(Arc::new(Fixed)))).unwrap();
        registry.load_all();
        registry.enable_all();

        events.dispatch_chat(&mut ChatMessage::new("zed", "hi"));
        wait_until(|| cached(&registry, "zed").as_deref() == Some("vip")).await;
    }
}
