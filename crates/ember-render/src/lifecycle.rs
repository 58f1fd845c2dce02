// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

/// Whole-engine state machine.
///
/// ```text
/// Uninitialized -> Initializing -> Running <-> Resizing
///                                     |
///                                     v
///                               ShuttingDown -> Released
/// ```
///
/// `Initializing -> ShuttingDown` covers a failed startup and
/// `Uninitialized -> ShuttingDown` a release that never initialised. Every
/// path to `Released` goes through `ShuttingDown`, where the device-idle wait
/// happens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Initializing,
    Running,
    Resizing,
    ShuttingDown,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition { from: Lifecycle, to: Lifecycle },
}

impl Lifecycle {
    pub fn can_transition_to(self, to: Lifecycle) -> bool {
        use Lifecycle::*;
        matches!(
            (self, to),
            (Uninitialized, Initializing)
                | (Uninitialized, ShuttingDown)
                | (Initializing, Running)
                | (Initializing, ShuttingDown)
                | (Running, Resizing)
                | (Resizing, Running)
                | (Running, ShuttingDown)
                | (ShuttingDown, Released)
        )
    }

    /// Moves to `to`, leaving `self` untouched on an illegal edge.
    pub fn transition(&mut self, to: Lifecycle) -> Result<(), LifecycleError> {
        if !self.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }

    pub fn is_terminal(self) -> bool {
        self == Lifecycle::Released
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Initializing => "initializing",
            Lifecycle::Running => "running",
            Lifecycle::Resizing => "resizing",
            Lifecycle::ShuttingDown => "shutting-down",
            Lifecycle::Released => "released",
        };
        f.write_str(name)
    }
}
