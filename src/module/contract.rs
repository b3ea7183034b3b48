//! The capability contract every feature module implements.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::ModuleLookup;
use crate::config::ConfigSource;
use crate::events::EventBus;

/// Lifecycle state of a registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Created,
    Loaded,
    Enabled,
    Disabled,
    /// Excluded from further transitions.
    Failed,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Loaded => "loaded",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A lifecycle transition driven by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Load,
    Enable,
    Disable,
    Reload,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Load => "load",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Reload => "reload",
        };
        f.write_str(s)
    }
}

/// What a module sees while one of its hooks runs.
#[derive(Clone)]
pub struct ModuleContext {
    /// Name of the module the hook belongs to.
    pub module: String,
    pub config: Arc<dyn ConfigSource>,
    pub events: EventBus,
    /// Name-based access to sibling modules.
    pub modules: ModuleLookup,
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

/// A feature unit with a fixed lifecycle.
///
/// Hooks report failure through their `Result`; the registry also catches
/// panics, so a broken module never takes its siblings down with it.
///
/// Handler registration belongs in `on_enable`, and `on_disable` should
/// release what `on_enable` acquired. `on_disable` may run on a module whose
/// enable only partly succeeded, so it must tolerate missing state.
pub trait Module: Any + Send + Sync {
    /// Unique, stable identifier.
    fn name(&self) -> &str;

    /// Modules that must be enabled before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn on_load(&mut self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_enable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()>;

    fn on_disable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()>;

    /// Re-read configuration and rebuild in-memory state.
    ///
    /// Defaults to a full disable followed by an enable.
    fn on_reload(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.on_disable(ctx)?;
        self.on_enable(ctx)
    }

    fn as_any(&self) -> &dyn Any;
}
