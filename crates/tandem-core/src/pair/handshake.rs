//! Handshake - 親子間の停止ハンドシェイク
//!
//! 親側の停止要求・子側の停止要求・persist の三つを一つの値にまとめ、
//! 名前付きの遷移でしか変更できないようにしています。
//! 「persist なのに親が停止要求済み」のような組み合わせは表現できません。
//!
//! この値はペアごとの Mutex の中にだけ置かれます（[`super::PairContext`] 参照）。

use crate::domain::Lifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentPhase {
    /// Ticking. With `persist`, child completion does not stop the parent.
    Running { persist: bool },
    /// The child finished and the parent will cancel itself on its next tick.
    StopRequested,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildPhase {
    Created,
    Running,
    StopRequested,
    Finished,
    Canceled,
}

/// What a child's completion did to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Parent will cancel itself on its next tick.
    ParentStopping,
    /// Parent is persistent and keeps ticking.
    ParentPersists,
    /// Parent was already stopping or canceled.
    ParentGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    parent: ParentPhase,
    child: ChildPhase,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// 親は生成と同時に Running（子を起動済み）
    pub fn new() -> Self {
        Self {
            parent: ParentPhase::Running { persist: false },
            child: ChildPhase::Created,
        }
    }

    pub fn parent_phase(&self) -> ParentPhase {
        self.parent
    }

    pub fn child_phase(&self) -> ChildPhase {
        self.child
    }

    /// Ask the child to stop. Returns `true` only on the first effective call.
    pub fn request_child_stop(&mut self) -> bool {
        match self.child {
            ChildPhase::Created | ChildPhase::Running => {
                self.child = ChildPhase::StopRequested;
                true
            }
            ChildPhase::StopRequested | ChildPhase::Finished | ChildPhase::Canceled => false,
        }
    }

    pub fn child_stop_requested(&self) -> bool {
        matches!(self.child, ChildPhase::StopRequested | ChildPhase::Canceled)
    }

    /// Returns `true` when persist was newly turned on.
    pub fn set_persist(&mut self) -> bool {
        match &mut self.parent {
            ParentPhase::Running { persist } => !std::mem::replace(persist, true),
            ParentPhase::StopRequested | ParentPhase::Canceled => false,
        }
    }

    pub fn persist(&self) -> bool {
        matches!(self.parent, ParentPhase::Running { persist: true })
    }

    /// The host invoked the child entry point.
    ///
    /// A stop requested before the child ran is kept, so the child loop exits
    /// on its first check.
    pub fn child_started(&mut self) {
        if self.child == ChildPhase::Created {
            self.child = ChildPhase::Running;
        }
    }

    /// The child entry point returned.
    pub fn child_finished(&mut self) -> Completion {
        if self.child != ChildPhase::Canceled {
            self.child = ChildPhase::Finished;
        }
        match self.parent {
            ParentPhase::Running { persist: true } => Completion::ParentPersists,
            ParentPhase::Running { persist: false } => {
                self.parent = ParentPhase::StopRequested;
                Completion::ParentStopping
            }
            ParentPhase::StopRequested | ParentPhase::Canceled => Completion::ParentGone,
        }
    }

    /// Parent side stop flag, checked after each tick.
    pub fn stop_requested(&self) -> bool {
        self.parent == ParentPhase::StopRequested
    }

    /// Parent canceled: the child is forced to `Canceled` as well.
    pub fn cancel_parent(&mut self) {
        self.parent = ParentPhase::Canceled;
        self.child = ChildPhase::Canceled;
    }

    pub fn cancel_child(&mut self) {
        self.child = ChildPhase::Canceled;
    }

    pub fn parent_lifecycle(&self) -> Lifecycle {
        match self.parent {
            ParentPhase::Running { .. } => Lifecycle::Running,
            ParentPhase::StopRequested => Lifecycle::StopRequested,
            ParentPhase::Canceled => Lifecycle::Canceled,
        }
    }

    pub fn child_lifecycle(&self) -> Lifecycle {
        match self.child {
            ChildPhase::Created => Lifecycle::Created,
            ChildPhase::Running => Lifecycle::Running,
            ChildPhase::StopRequested => Lifecycle::StopRequested,
            ChildPhase::Finished => Lifecycle::Finished,
            ChildPhase::Canceled => Lifecycle::Canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pair_runs_parent_and_waits_for_child() {
        let hs = Handshake::new();
        assert_eq!(hs.parent_lifecycle(), Lifecycle::Running);
        assert_eq!(hs.child_lifecycle(), Lifecycle::Created);
        assert!(!hs.persist());
        assert!(!hs.stop_requested());
        assert!(!hs.child_stop_requested());
    }

    #[test]
    fn child_completion_stops_non_persistent_parent() {
        let mut hs = Handshake::new();
        hs.child_started();

        assert_eq!(hs.child_finished(), Completion::ParentStopping);
        assert!(hs.stop_requested());
        assert_eq!(hs.child_lifecycle(), Lifecycle::Finished);
    }

    #[test]
    fn persist_keeps_parent_running_after_child_completion() {
        let mut hs = Handshake::new();
        assert!(hs.set_persist());
        hs.child_started();

        assert_eq!(hs.child_finished(), Completion::ParentPersists);
        assert!(!hs.stop_requested());
        assert_eq!(hs.parent_lifecycle(), Lifecycle::Running);
    }

    #[test]
    fn stop_request_is_idempotent() {
        let mut hs = Handshake::new();
        hs.child_started();

        assert!(hs.request_child_stop());
        assert!(!hs.request_child_stop());
        assert!(hs.child_stop_requested());
        assert_eq!(hs.child_lifecycle(), Lifecycle::StopRequested);
    }

    #[test]
    fn stop_requested_before_start_survives_start() {
        let mut hs = Handshake::new();
        hs.request_child_stop();
        hs.child_started();
        assert!(hs.child_stop_requested());
    }

    #[test]
    fn parent_cancel_forces_child_canceled() {
        let mut hs = Handshake::new();
        hs.child_started();
        hs.cancel_parent();

        assert_eq!(hs.parent_lifecycle(), Lifecycle::Canceled);
        assert_eq!(hs.child_lifecycle(), Lifecycle::Canceled);
        assert!(hs.child_stop_requested());

        // the child still reports in on its way out
        assert_eq!(hs.child_finished(), Completion::ParentGone);
        assert_eq!(hs.child_lifecycle(), Lifecycle::Canceled);
    }

    #[test]
    fn persist_cannot_be_set_once_parent_is_stopping() {
        let mut hs = Handshake::new();
        hs.child_finished();

        assert!(!hs.set_persist());
        assert!(!hs.persist());
        assert!(hs.stop_requested());
    }
}
