//! Module registry - drives every module through its lifecycle.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, error, info, info_span};

use super::{
    LifecycleError, Module, ModuleContext, ModuleState, RegistryError, Transition, TransitionReport,
};
use crate::config::ConfigSource;
use crate::events::EventBus;

type ModuleCell = Arc<RwLock<Box<dyn Module>>>;

struct Slot {
    cell: ModuleCell,
    dependencies: Vec<String>,
    state: ModuleState,
    last_error: Option<LifecycleError>,
}

#[derive(Default)]
struct Inner {
    /// Registration order.
    order: Vec<String>,
    slots: HashMap<String, Slot>,
    /// Currently enabled modules, in the order they were enabled.
    enabled: Vec<String>,
    closed: bool,
}

struct Shared {
    inner: RwLock<Inner>,
    config: Arc<dyn ConfigSource>,
    events: EventBus,
}

/// Owns the registered modules and runs their lifecycle transitions.
///
/// The `*_all` passes are meant to be driven from a single control path
/// (startup, shutdown, administrative reload). Each pass returns a report
/// of every attempted transition instead of failing as a whole.
#[derive(Clone)]
pub struct ModuleRegistry {
    shared: Arc<Shared>,
}

impl ModuleRegistry {
    pub fn new(config: Arc<dyn ConfigSource>, events: EventBus) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: RwLock::new(Inner::default()),
                config,
                events,
            }),
        }
    }

    /// Add a module. Fails on a duplicate name or once loading has begun.
    pub fn register(&self, module: Box<dyn Module>) -> Result<(), RegistryError> {
        let name = module.name().to_string();
        let dependencies = module.dependencies();
        let mut inner = self.shared.inner.write();

        if inner.closed {
            return Err(RegistryError::RegistrationClosed(name));
        }
        if inner.slots.contains_key(&name) {
            return Err(RegistryError::DuplicateModule(name));
        }

        debug!("Registered module {} (depends on {:?})", name, dependencies);
        inner.order.push(name.clone());
        inner.slots.insert(
            name,
            Slot {
                cell: Arc::new(RwLock::new(module)),
                dependencies,
                state: ModuleState::Created,
                last_error: None,
            },
        );
        Ok(())
    }

    /// Load every created module in registration order.
    ///
    /// Closes registration.
    pub fn load_all(&self) -> TransitionReport {
        let names = {
            let mut inner = self.shared.inner.write();
            inner.closed = true;
            inner.order.clone()
        };

        let mut report = TransitionReport::new(Transition::Load);
        for name in names {
            let Some((cell, ModuleState::Created)) = self.snapshot(&name) else {
                continue;
            };

            let result = self.run_hook(&name, &cell, Transition::Load, |m, ctx| m.on_load(ctx));
            match &result {
                Ok(()) => self.set_state(&name, ModuleState::Loaded, None),
                Err(e) => self.set_state(&name, ModuleState::Failed, Some(e.clone())),
            }
            self.finish(&mut report, &name, Transition::Load, result);
        }

        info!(
            "Load pass finished: {} succeeded, {} failed",
            report.succeeded().count(),
            report.failed().count()
        );
        report
    }

    /// Enable every loaded or disabled module.
    ///
    /// Modules go in registration order, except that a module whose
    /// dependencies are not enabled yet is deferred to the next pass. When a
    /// pass makes no progress, the modules still waiting fail with
    /// `DependencyUnresolved`.
    pub fn enable_all(&self) -> TransitionReport {
        let mut pending: Vec<String> = {
            let inner = self.shared.inner.read();
            inner
                .order
                .iter()
                .filter(|name| {
                    matches!(
                        inner.slots[name.as_str()].state,
                        ModuleState::Loaded | ModuleState::Disabled
                    )
                })
                .cloned()
                .collect()
        };

        let mut report = TransitionReport::new(Transition::Enable);
        while !pending.is_empty() {
            let mut progressed = false;
            let mut deferred = Vec::new();

            for name in pending {
                if !self.missing_dependencies(&name).is_empty() {
                    deferred.push(name);
                    continue;
                }
                let Some((cell, _)) = self.snapshot(&name) else {
                    continue;
                };

                let result = self.enable_one(&name, &cell);
                self.finish(&mut report, &name, Transition::Enable, result);
                progressed = true;
            }

            if !progressed {
                for name in &deferred {
                    let error = LifecycleError::DependencyUnresolved {
                        missing: self.missing_dependencies(name),
                    };
                    self.set_state(name, ModuleState::Failed, Some(error.clone()));
                    self.finish(&mut report, name, Transition::Enable, Err(error));
                }
                break;
            }
            pending = deferred;
        }

        info!(
            "Enable pass finished: {} succeeded, {} failed",
            report.succeeded().count(),
            report.failed().count()
        );
        report
    }

    /// Disable every enabled module, most recently enabled first.
    ///
    /// Best-effort: every module ends disabled even if its hook fails.
    pub fn disable_all(&self) -> TransitionReport {
        let names: Vec<String> = self.shared.inner.read().enabled.iter().rev().cloned().collect();

        let mut report = TransitionReport::new(Transition::Disable);
        for name in names {
            if let Some((cell, ModuleState::Enabled)) = self.snapshot(&name) {
                let result = self.disable_one(&name, &cell);
                self.finish(&mut report, &name, Transition::Disable, result);
            }
        }

        info!(
            "Disable pass finished: {} succeeded, {} failed",
            report.succeeded().count(),
            report.failed().count()
        );
        report
    }

    /// Reload every enabled module in enable order.
    ///
    /// A module whose reload fails ends disabled. A module whose dependency
    /// was disabled earlier in the pass is disabled too.
    pub fn reload_all(&self) -> TransitionReport {
        let names: Vec<String> = self.shared.inner.read().enabled.clone();

        let mut report = TransitionReport::new(Transition::Reload);
        for name in names {
            let Some((cell, ModuleState::Enabled)) = self.snapshot(&name) else {
                continue;
            };

            let missing = self.missing_dependencies(&name);
            if !missing.is_empty() {
                if let Err(e) = self.disable_one(&name, &cell) {
                    debug!("Disable of {} during reload also failed: {}", name, e);
                }
                let error = LifecycleError::DependencyUnresolved { missing };
                self.set_last_error(&name, error.clone());
                self.finish(&mut report, &name, Transition::Reload, Err(error));
                continue;
            }

            let result = self.run_hook(&name, &cell, Transition::Reload, |m, ctx| m.on_reload(ctx));
            if let Err(e) = &result {
                self.set_state(&name, ModuleState::Disabled, Some(e.clone()));
                self.release_events(&name);
            }
            self.finish(&mut report, &name, Transition::Reload, result);
        }

        info!(
            "Reload pass finished: {} succeeded, {} failed",
            report.succeeded().count(),
            report.failed().count()
        );
        report
    }

    /// Enable a single loaded or disabled module.
    ///
    /// Unmet dependencies are reported without changing the module's state.
    pub fn enable_module(&self, name: &str) -> Result<(), LifecycleError> {
        let (cell, state) = self
            .snapshot(name)
            .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?;

        if !matches!(state, ModuleState::Loaded | ModuleState::Disabled) {
            return Err(LifecycleError::InvalidState {
                transition: Transition::Enable,
                state,
            });
        }

        let missing = self.missing_dependencies(name);
        if !missing.is_empty() {
            let error = LifecycleError::DependencyUnresolved { missing };
            log_outcome(name, Transition::Enable, &Err(error.clone()));
            return Err(error);
        }

        let result = self.enable_one(name, &cell);
        log_outcome(name, Transition::Enable, &result);
        result
    }

    /// Disable a single enabled module, and first every enabled module that
    /// depends on it, directly or transitively.
    pub fn disable_module(&self, name: &str) -> Result<TransitionReport, LifecycleError> {
        let (_, state) = self
            .snapshot(name)
            .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?;

        if state != ModuleState::Enabled {
            return Err(LifecycleError::InvalidState {
                transition: Transition::Disable,
                state,
            });
        }

        let targets: Vec<String> = {
            let inner = self.shared.inner.read();
            let mut affected: HashSet<&str> = HashSet::from([name]);
            loop {
                let before = affected.len();
                for enabled in &inner.enabled {
                    let deps = &inner.slots[enabled.as_str()].dependencies;
                    if deps.iter().any(|d| affected.contains(d.as_str())) {
                        affected.insert(enabled.as_str());
                    }
                }
                if affected.len() == before {
                    break;
                }
            }
            inner
                .enabled
                .iter()
                .rev()
                .filter(|n| affected.contains(n.as_str()))
                .cloned()
                .collect()
        };

        let mut report = TransitionReport::new(Transition::Disable);
        for target in targets {
            if let Some((cell, ModuleState::Enabled)) = self.snapshot(&target) {
                let result = self.disable_one(&target, &cell);
                self.finish(&mut report, &target, Transition::Disable, result);
            }
        }
        Ok(report)
    }

    /// Look up a module by name.
    ///
    /// Resolve by name each time it is needed; a handle kept across a reload
    /// may point at state the module has since replaced.
    #[allow(dead_code)]
    pub fn get_module(&self, name: &str) -> Option<ModuleHandle> {
        self.lookup().get(name)
    }

    /// A weak, name-based view of this registry for modules.
    pub fn lookup(&self) -> ModuleLookup {
        ModuleLookup {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn state(&self, name: &str) -> Option<ModuleState> {
        self.shared.inner.read().slots.get(name).map(|s| s.state)
    }

    /// Every module with its state, in registration order.
    pub fn states(&self) -> Vec<(String, ModuleState)> {
        let inner = self.shared.inner.read();
        inner
            .order
            .iter()
            .map(|name| (name.clone(), inner.slots[name.as_str()].state))
            .collect()
    }

    /// The most recent failure recorded for a module.
    pub fn last_error(&self, name: &str) -> Option<LifecycleError> {
        self.shared
            .inner
            .read()
            .slots
            .get(name)
            .and_then(|s| s.last_error.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.shared.inner.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.shared.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inner.read().closed
    }

    fn snapshot(&self, name: &str) -> Option<(ModuleCell, ModuleState)> {
        self.shared
            .inner
            .read()
            .slots
            .get(name)
            .map(|s| (Arc::clone(&s.cell), s.state))
    }

    fn missing_dependencies(&self, name: &str) -> Vec<String> {
        let inner = self.shared.inner.read();
        let Some(slot) = inner.slots.get(name) else {
            return Vec::new();
        };

        slot.dependencies
            .iter()
            .filter(|dep| {
                inner.slots.get(dep.as_str()).map(|s| s.state) != Some(ModuleState::Enabled)
            })
            .cloned()
            .collect()
    }

    fn context(&self, name: &str) -> ModuleContext {
        ModuleContext {
            module: name.to_string(),
            config: Arc::clone(&self.shared.config),
            events: self.shared.events.clone(),
            modules: self.lookup(),
        }
    }

    /// Run one hook with the module locked, turning errors and panics into
    /// a `LifecycleError`.
    fn run_hook<F>(
        &self,
        name: &str,
        cell: &ModuleCell,
        transition: Transition,
        hook: F,
    ) -> Result<(), LifecycleError>
    where
        F: FnOnce(&mut dyn Module, &ModuleContext) -> anyhow::Result<()>,
    {
        let ctx = self.context(name);
        let span = info_span!("module", module = %name, transition = %transition);
        let _enter = span.enter();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut module = cell.write();
            hook(&mut **module, &ctx)
        }));

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LifecycleError::Hook {
                transition,
                detail: format!("{:#}", e),
            }),
            Err(payload) => Err(LifecycleError::Panicked {
                transition,
                detail: panic_message(payload.as_ref()),
            }),
        }
    }

    fn enable_one(&self, name: &str, cell: &ModuleCell) -> Result<(), LifecycleError> {
        let result = self.run_hook(name, cell, Transition::Enable, |m, ctx| m.on_enable(ctx));
        match &result {
            Ok(()) => self.set_state(name, ModuleState::Enabled, None),
            Err(e) => {
                self.set_state(name, ModuleState::Failed, Some(e.clone()));
                self.release_events(name);
            }
        }
        result
    }

    fn disable_one(&self, name: &str, cell: &ModuleCell) -> Result<(), LifecycleError> {
        let result = self.run_hook(name, cell, Transition::Disable, |m, ctx| m.on_disable(ctx));
        self.set_state(name, ModuleState::Disabled, result.as_ref().err().cloned());
        self.release_events(name);
        result
    }

    fn release_events(&self, name: &str) {
        let released = self.shared.events.release(name);
        if released > 0 {
            debug!("Released {} leftover event registrations of {}", released, name);
        }
    }

    fn set_state(&self, name: &str, state: ModuleState, error: Option<LifecycleError>) {
        let mut inner = self.shared.inner.write();
        let Some(slot) = inner.slots.get_mut(name) else {
            return;
        };
        slot.state = state;
        if error.is_some() {
            slot.last_error = error;
        }

        inner.enabled.retain(|n| n != name);
        if state == ModuleState::Enabled {
            inner.enabled.push(name.to_string());
        }
    }

    fn set_last_error(&self, name: &str, error: LifecycleError) {
        if let Some(slot) = self.shared.inner.write().slots.get_mut(name) {
            slot.last_error = Some(error);
        }
    }

    fn finish(
        &self,
        report: &mut TransitionReport,
        name: &str,
        transition: Transition,
        result: Result<(), LifecycleError>,
    ) {
        log_outcome(name, transition, &result);
        report.record(name, transition, result.err());
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.states())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Weak, name-based access to the registry's modules.
///
/// Handed to modules through their context; it never keeps the registry alive.
#[derive(Clone)]
pub struct ModuleLookup {
    shared: Weak<Shared>,
}

impl ModuleLookup {
    pub fn get(&self, name: &str) -> Option<ModuleHandle> {
        let shared = self.shared.upgrade()?;
        let inner = shared.inner.read();
        inner.slots.get(name).map(|slot| ModuleHandle {
            name: name.to_string(),
            cell: Arc::clone(&slot.cell),
        })
    }

    /// Like `get`, but only for a module that is currently enabled.
    pub fn get_enabled(&self, name: &str) -> Option<ModuleHandle> {
        if self.state(name)? != ModuleState::Enabled {
            return None;
        }
        self.get(name)
    }

    pub fn state(&self, name: &str) -> Option<ModuleState> {
        let shared = self.shared.upgrade()?;
        let state = shared.inner.read().slots.get(name).map(|s| s.state);
        state
    }
}

impl std::fmt::Debug for ModuleLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLookup")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

/// A looked-up module. Meant to be used and dropped, not stored.
#[derive(Clone)]
pub struct ModuleHandle {
    name: String,
    cell: ModuleCell,
}

impl ModuleHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read access to the module. Blocks while one of its hooks runs.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<dyn Module>> {
        self.cell.read()
    }

    /// Run `f` against the module as its concrete type.
    ///
    /// Returns `None` if the module is not a `T`.
    pub fn with<T, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R>
    where
        T: Module,
    {
        let module = self.cell.read();
        module.as_any().downcast_ref::<T>().map(f)
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle").field("name", &self.name).finish()
    }
}

fn log_outcome(name: &str, transition: Transition, result: &Result<(), LifecycleError>) {
    match result {
        Ok(()) => info!(
            module = %name,
            transition = %transition,
            outcome = "success",
            "Module {} {} succeeded",
            name,
            transition
        ),
        Err(e) => error!(
            module = %name,
            transition = %transition,
            outcome = "failure",
            error = %e,
            "Module {} failed to {}",
            name,
            transition
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
