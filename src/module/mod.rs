//! Module system - lifecycle orchestration for feature modules.
//!
//! ## Architecture
//!
//! - `Module` - The capability contract every feature implements
//! - `ModuleRegistry` - Owns the modules and drives their transitions
//! - `TransitionReport` - Per-module outcome of each orchestration pass
//!
//! ## Lifecycle
//!
//! ```text
//! Created --load--> Loaded --enable--> Enabled <--enable/disable--> Disabled
//!    |                 |                  |
//!    +---- failure ----+---> Failed       +--reload (failure)--> Disabled
//! ```
//!
//! A failing hook only ever affects its own module: the registry records
//! the error, logs it with the module name and carries on with the rest.

mod contract;
mod error;
mod registry;
mod report;

pub use contract::{Module, ModuleContext, ModuleState, Transition};
pub use error::{LifecycleError, RegistryError};
pub use registry::{ModuleHandle, ModuleLookup, ModuleRegistry};
pub use report::{ModuleOutcome, TransitionReport};
