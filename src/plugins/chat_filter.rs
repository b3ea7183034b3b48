//! Chat filter module - configurable word substitution.

use std::any::Any;

use tracing::debug;

use super::ranks::{self, RanksModule};
use crate::config::ConfigSource;
use crate::events::ChatMessage;
use crate::module::{Module, ModuleContext, ModuleLookup};
use crate::utils::replace_ignore_case;

pub const NAME: &str = "chat-filter";

/// Rewrites chat lines using the `chat-filter.replacements` table.
///
/// Senders whose rank is listed in `chat-filter.bypass-ranks`
/// (comma-separated) are left alone.
#[derive(Debug, Default)]
pub struct ChatFilterModule;

impl ChatFilterModule {
    pub fn new() -> Self {
        Self
    }
}

impl Module for ChatFilterModule {
    fn name(&self) -> &str {
        NAME
    }

    fn dependencies(&self) -> Vec<String> {
        vec![ranks::NAME.to_string()]
    }

    fn on_enable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let config = ctx.config.clone();
        let modules = ctx.modules.clone();
        ctx.events.on_chat(&ctx.module, move |msg| {
            filter_message(config.as_ref(), &modules, msg);
            Ok(())
        });
        Ok(())
    }

    fn on_disable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        ctx.events.release(&ctx.module);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn filter_message(config: &dyn ConfigSource, modules: &ModuleLookup, msg: &mut ChatMessage) {
    if !config.get_bool("chat-filter.enabled", true) {
        return;
    }

    if bypasses_filter(config, modules, &msg.sender) {
        debug!("{} bypasses the chat filter", msg.sender);
        return;
    }

    for (word, replacement) in config.get_section("chat-filter.replacements") {
        if let Some(replacement) = replacement.as_str() {
            msg.text = replace_ignore_case(&msg.text, &word, replacement);
        }
    }
}

fn bypasses_filter(config: &dyn ConfigSource, modules: &ModuleLookup, player: &str) -> bool {
    let bypass = config.get_string("chat-filter.bypass-ranks", "");
    if bypass.trim().is_empty() {
        return false;
    }

    // Resolved by name per message; the ranks module may have been reloaded.
    let rank = modules
        .get_enabled(ranks::NAME)
        .and_then(|handle| handle.with(|r: &RanksModule| r.cached_rank(player)))
        .flatten();

    match rank {
        Some(rank) => bypass.split(',').any(|r| r.trim().eq_ignore_ascii_case(&rank)),
        None => false,
    }
}
