//! Hearth - modular game server host
//!
//! Loads feature modules, drives their lifecycle and feeds them chat,
//! anvil and command events typed at the console.
//!
//! ## Architecture
//!
//! - `config` - Environment and JSON module configuration
//! - `cache` - Bounded, expiring caches for module lookups
//! - `module` - Module contract and lifecycle registry
//! - `events` - Event bus modules register handlers on
//! - `plugins` - Built-in feature modules
//! - `host` - Console harness
//! - `utils` - Utility functions

mod cache;
mod config;
mod events;
mod host;
mod module;
mod plugins;
mod utils;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{HostConfig, JsonConfig};
use events::EventBus;
use host::Console;
use module::ModuleRegistry;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let host_config = HostConfig::from_env();

    // RUST_LOG wins over HEARTH_LOG
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&host_config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Hearth...");
    info!("Module config: {}", host_config.config_path.display());

    let config = Arc::new(JsonConfig::from_file(&host_config.config_path));
    let (events, replies) = EventBus::new();
    let registry = ModuleRegistry::new(config.clone(), events.clone());

    for module in plugins::builtin_modules() {
        if let Err(e) = registry.register(module) {
            error!("Failed to register module: {}", e);
        }
    }
    info!("Registered {} modules", registry.len());

    print!("{}", registry.load_all());
    print!("{}", registry.enable_all());

    let console = Console {
        registry,
        config,
        events,
    };
    console.run(replies).await?;

    print!("{}", console.registry.disable_all());
    info!("Hearth stopped");
    Ok(())
}
