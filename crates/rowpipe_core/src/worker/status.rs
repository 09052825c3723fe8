use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use rowpipe_error::{RowpipeError, Result};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a stage copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WorkerStatus {
    Empty = 0,
    Init = 1,
    Idle = 2,
    Failed = 3,
    Running = 4,
    Paused = 5,
    /// Stop requested, not yet observed by the worker.
    Halting = 6,
    Stopped = 7,
    Finished = 8,
    Disposed = 9,
}

impl WorkerStatus {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Empty,
            1 => Self::Init,
            2 => Self::Idle,
            3 => Self::Failed,
            4 => Self::Running,
            5 => Self::Paused,
            6 => Self::Halting,
            7 => Self::Stopped,
            8 => Self::Finished,
            _ => Self::Disposed,
        }
    }

    /// If moving from `self` to `next` is a legal transition.
    pub const fn can_transition_to(self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        matches!(
            (self, next),
            (Empty, Init)
                | (Init, Idle)
                | (Init, Failed)
                | (Idle, Running)
                | (Idle, Stopped)
                | (Running, Paused)
                | (Running, Halting)
                | (Running, Finished)
                | (Paused, Running)
                | (Paused, Halting)
                | (Halting, Stopped)
                | (Finished, Disposed)
                | (Stopped, Disposed)
        )
    }

    /// If the worker is done processing rows, successfully or not.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped | Self::Finished | Self::Disposed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Init => "init",
            Self::Idle => "idle",
            Self::Failed => "failed",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Halting => "halting",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
            Self::Disposed => "disposed",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Atomically updated worker status.
///
/// Written by the worker thread and by the orchestrator (stop, pause), read by
/// monitoring.
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub const fn new() -> Self {
        AtomicStatus(AtomicU8::new(WorkerStatus::Empty as u8))
    }

    pub fn get(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next`, erroring if the move is illegal from the current
    /// status.
    pub fn transition(&self, next: WorkerStatus) -> Result<WorkerStatus> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let status = WorkerStatus::from_u8(current);
            if !status.can_transition_to(next) {
                return Err(RowpipeError::new("Illegal worker status transition")
                    .with_field("from", status)
                    .with_field("to", next));
            }
            match self.0.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(status),
                Err(actual) => current = actual,
            }
        }
    }

    /// Move to `next` only if currently in `from`.
    ///
    /// Returns if the transition happened.
    pub fn transition_from(&self, from: WorkerStatus, next: WorkerStatus) -> bool {
        debug_assert!(from.can_transition_to(next));
        self.0
            .compare_exchange(from as u8, next as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_lifecycle() {
        let status = AtomicStatus::new();
        for next in [
            WorkerStatus::Init,
            WorkerStatus::Idle,
            WorkerStatus::Running,
            WorkerStatus::Paused,
            WorkerStatus::Running,
            WorkerStatus::Finished,
            WorkerStatus::Disposed,
        ] {
            status.transition(next).unwrap();
            assert_eq!(next, status.get());
        }
    }

    #[test]
    fn stop_lifecycle() {
        let status = AtomicStatus::new();
        status.transition(WorkerStatus::Init).unwrap();
        status.transition(WorkerStatus::Idle).unwrap();
        status.transition(WorkerStatus::Running).unwrap();
        status.transition(WorkerStatus::Halting).unwrap();
        status.transition(WorkerStatus::Stopped).unwrap();
        assert!(status.get().is_terminal());
    }

    #[test]
    fn illegal_transitions() {
        struct TestCase {
            path: &'static [WorkerStatus],
            illegal: WorkerStatus,
        }

        use WorkerStatus::*;
        let cases = [
            TestCase {
                path: &[Init, Idle, Running, Finished],
                illegal: Running,
            },
            TestCase {
                path: &[Init, Failed],
                illegal: Idle,
            },
            TestCase {
                path: &[Init, Failed],
                illegal: Disposed,
            },
            TestCase {
                path: &[],
                illegal: Running,
            },
            TestCase {
                path: &[Init, Idle, Running, Halting],
                illegal: Running,
            },
        ];

        for case in cases {
            let status = AtomicStatus::new();
            for next in case.path {
                status.transition(*next).unwrap();
            }
            let before = status.get();
            status.transition(case.illegal).unwrap_err();
            assert_eq!(before, status.get());
        }
    }

    #[test]
    fn transition_from_checks_current() {
        let status = AtomicStatus::new();
        status.transition(WorkerStatus::Init).unwrap();
        status.transition(WorkerStatus::Idle).unwrap();
        assert!(!status.transition_from(WorkerStatus::Running, WorkerStatus::Halting));
        assert!(status.transition_from(WorkerStatus::Idle, WorkerStatus::Running));
        assert_eq!(WorkerStatus::Running, status.get());
    }
}
