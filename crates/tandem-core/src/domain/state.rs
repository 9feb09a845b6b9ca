//! State - ペアの役割とライフサイクル

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of a pair an instance is. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Ticked periodically on the host scheduler thread.
    Parent,
    /// Runs once, on its own dedicated thread.
    Child,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Parent => f.write_str("parent"),
            Role::Child => f.write_str("child"),
        }
    }
}

/// Lifecycle of one half of a pair.
///
/// State transitions:
/// - Created -> Running -> StopRequested -> Canceled
/// - Created -> Running -> Canceled (explicit cancel)
/// - child only: ... -> Finished (entry point returned) -> Canceled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    Created,
    Running,
    StopRequested,
    Finished,
    Canceled,
}

impl Lifecycle {
    pub fn is_terminal(self) -> bool {
        matches!(self, Lifecycle::Canceled)
    }
}
