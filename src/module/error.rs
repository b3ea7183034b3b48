//! Registry and lifecycle errors.

use serde::Serialize;
use thiserror::Error;

use super::{ModuleState, Transition};

/// Setup errors, returned straight to the caller of `register`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("module '{0}' is already registered")]
    DuplicateModule(String),

    #[error("cannot register '{0}': registration closed once loading began")]
    RegistrationClosed(String),
}

/// Why a single module's transition failed.
///
/// Recorded per module in transition reports; never aborts an orchestration pass.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleError {
    #[error("dependency unresolved: {}", missing.join(", "))]
    DependencyUnresolved { missing: Vec<String> },

    #[error("{transition} hook failed: {detail}")]
    Hook { transition: Transition, detail: String },

    #[error("{transition} hook panicked: {detail}")]
    Panicked { transition: Transition, detail: String },

    #[error("cannot {transition} a module in state {state}")]
    InvalidState { transition: Transition, state: ModuleState },

    #[error("module '{0}' is not registered")]
    NotFound(String),
}
