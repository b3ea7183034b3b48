//! Per-module outcome reports for orchestration passes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{LifecycleError, Transition};

/// Result of one attempted transition on one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleOutcome {
    pub module: String,
    pub transition: Transition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LifecycleError>,
}

impl ModuleOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything one pass (`load_all`, `enable_all`, ...) attempted, in order.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    pub transition: Transition,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<ModuleOutcome>,
}

impl TransitionReport {
    pub(crate) fn new(transition: Transition) -> Self {
        Self {
            transition,
            started_at: Utc::now(),
            outcomes: Vec::new(),
        }
    }

    pub(crate) fn record(
        &mut self,
        module: &str,
        transition: Transition,
        error: Option<LifecycleError>,
    ) {
        self.outcomes.push(ModuleOutcome {
            module: module.to_string(),
            transition,
            error,
        });
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ModuleOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ModuleOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// True when no attempted transition failed.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ModuleOutcome::is_success)
    }

    /// The outcome recorded for `module`, if it was attempted in this pass.
    pub fn outcome(&self, module: &str) -> Option<&ModuleOutcome> {
        self.outcomes.iter().find(|o| o.module == module)
    }
}

impl fmt::Display for TransitionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} succeeded, {} failed",
            self.transition,
            self.succeeded().count(),
            self.failed().count()
        )?;
        for outcome in &self.outcomes {
            match &outcome.error {
                None => writeln!(f, "  + {}", outcome.module)?,
                Some(e) => writeln!(f, "  - {} ({}): {}", outcome.module, outcome.transition, e)?,
            }
        }
        Ok(())
    }
}
