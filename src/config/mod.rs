//! Configuration module for the Hearth host.
//!
//! Host settings are loaded from environment variables; module settings
//! live in a JSON document exposed through [`ConfigSource`].

mod source;

use std::env;
use std::path::PathBuf;

pub use source::{ConfigSource, JsonConfig};

/// Host configuration
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Path of the module configuration document.
    pub config_path: PathBuf,

    /// Log filter used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl HostConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let config_path = env::var("HEARTH_CONFIG")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "hearth.json".to_string());

        let log_filter = env::var("HEARTH_LOG").unwrap_or_else(|_| "hearth=info".to_string());

        Self {
            config_path: PathBuf::from(config_path),
            log_filter,
        }
    }
}
