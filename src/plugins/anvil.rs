//! Anvil module - caps repair costs.

use std::any::Any;

use tracing::debug;

use crate::config::ConfigSource;
use crate::events::AnvilRepair;
use crate::module::{Module, ModuleContext};

pub const NAME: &str = "anvil";

/// Vanilla refuses repairs above this cost.
const DEFAULT_MAX_COST: i64 = 39;

#[derive(Debug, Default)]
pub struct AnvilModule;

impl AnvilModule {
    pub fn new() -> Self {
        Self
    }
}

impl Module for AnvilModule {
    fn name(&self) -> &str {
        NAME
    }

    fn on_enable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let config = ctx.config.clone();
        ctx.events.on_anvil(&ctx.module, move |repair| {
            cap_cost(config.as_ref(), repair);
            Ok(())
        });

        let config = ctx.config.clone();
        ctx.events.on_command(&ctx.module, "anvil", move |cmd| {
            if config.get_bool("anvil.enabled", true) {
                let max = max_cost(config.as_ref());
                cmd.reply(format!("Anvil repairs are capped at {} levels.", max));
            } else {
                cmd.reply("Anvil cost limit is off.");
            }
            Ok(())
        })?;
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

fn max_cost(config: &dyn ConfigSource) -> u32 {
    let max = config.get_int("anvil.max-cost", DEFAULT_MAX_COST);
    u32::try_from(max.max(0)).unwrap_or(u32::MAX)
}

fn cap_cost(config: &dyn ConfigSource, repair: &mut AnvilRepair) {
    if !config.get_bool("anvil.enabled", true) {
        return;
    }

    let max = max_cost(config);
    if repair.cost > max {
        debug!(
            "Capping {}'s {} repair from {} to {}",
            repair.player, repair.item, repair.cost, max
        );
        repair.cost = max;
    }
}
