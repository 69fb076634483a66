//! Lifecycle stages of a pairing session.
//!
//! ```text
//! Idle -> Connecting -> AwaitingCode -> CodeIssued -> Linking -> Linked
//!             |              |              |            |
//!             +--------------+--------------+------------+--> Failed | Closed | TimedOut
//! ```

use serde::Serialize;

/// Stage of the session state machine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    #[default]
    Idle,
    Connecting,
    AwaitingCode,
    CodeIssued,
    Linking,
    Linked,
    Closed,
    Failed,
    TimedOut,
}

impl LifecycleStage {
    /// Whether no further transition can happen in this session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleStage::Linked
                | LifecycleStage::Closed
                | LifecycleStage::Failed
                | LifecycleStage::TimedOut
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: LifecycleStage) -> bool {
        use LifecycleStage::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Idle, Connecting) => true,
            (Connecting, AwaitingCode) => true,
            (AwaitingCode, CodeIssued) => true,
            (CodeIssued, Linking) => true,
            (Linking, Linked) => true,
            // Any live stage may be abandoned.
            (Idle, _) => false,
            (_, Failed | Closed | TimedOut) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleStage::Idle => "idle",
            LifecycleStage::Connecting => "connecting",
            LifecycleStage::AwaitingCode => "awaiting_code",
            LifecycleStage::CodeIssued => "code_issued",
            LifecycleStage::Linking => "linking",
            LifecycleStage::Linked => "linked",
            LifecycleStage::Closed => "closed",
            LifecycleStage::Failed => "failed",
            LifecycleStage::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Attempted an illegal stage transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal stage transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: LifecycleStage,
    pub to: LifecycleStage,
}
