//! Per-plugin load states.
//!
//! Each plugin walks `Discovered -> DependencyChecked -> Scanned -> Classified
//! -> (Rewritten | Skipped) -> Loaded`, or drops to `Failed` from any
//! non-terminal state.

use modshim_runtime::FailReason;
use serde::Serialize;
use std::fmt;

/// Where a plugin is in the load pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum LoadState {
    /// Found on disk or handed in by the caller.
    Discovered,
    /// Passed dependency resolution.
    DependencyChecked,
    /// Binary read and scanned for host references.
    Scanned,
    /// Every reference has a verdict.
    Classified,
    /// Relocated references were rewritten.
    Rewritten,
    /// Nothing to rewrite.
    Skipped,
    /// Activated by the host.
    Loaded,
    /// Terminal failure.
    Failed(FailReason),
}

impl LoadState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Failed(_))
    }

    /// Whether `next` may follow `self`.
    pub fn can_advance_to(&self, next: LoadState) -> bool {
        use LoadState::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed(_)) {
            return true;
        }
        matches!(
            (self, next),
            (Discovered, DependencyChecked)
                | (DependencyChecked, Scanned)
                | (Scanned, Classified)
                | (Classified, Rewritten)
                | (Classified, Skipped)
                | (Rewritten, Loaded)
                | (Skipped, Loaded)
        )
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Discovered => f.write_str("discovered"),
            LoadState::DependencyChecked => f.write_str("dependency_checked"),
            LoadState::Scanned => f.write_str("scanned"),
            LoadState::Classified => f.write_str("classified"),
            LoadState::Rewritten => f.write_str("rewritten"),
            LoadState::Skipped => f.write_str("skipped"),
            LoadState::Loaded => f.write_str("loaded"),
            LoadState::Failed(reason) => write!(f, "failed({})", reason),
        }
    }
}

/// An illegal state transition. Indicates a pipeline bug.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid load state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: LoadState,
    pub to: LoadState,
}

/// The ordered states one plugin passed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StateTrail {
    states: Vec<LoadState>,
}

impl StateTrail {
    /// Start a trail at `Discovered`.
    pub fn new() -> Self {
        Self {
            states: vec![LoadState::Discovered],
        }
    }

    /// The latest state.
    pub fn current(&self) -> LoadState {
        // The trail is never empty.
        self.states
            .last()
            .copied()
            .unwrap_or(LoadState::Discovered)
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(&mut self, next: LoadState) -> Result<(), InvalidTransition> {
        let from = self.current();
        if !from.can_advance_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.states.push(next);
        Ok(())
    }

    /// Record a failure. A trail that is already terminal keeps its state.
    pub fn fail(&mut self, reason: FailReason) {
        if !self.current().is_terminal() {
            self.states.push(LoadState::Failed(reason));
        }
    }

    pub fn states(&self) -> &[LoadState] {
        &self.states
    }

    /// Whether the trail ever reached `state`.
    pub fn reached(&self, state: LoadState) -> bool {
        self.states.contains(&state)
    }
}

impl Default for StateTrail {
    fn default() -> Self {
        Self::new()
    }
}
