//! The control block shared by a controller and its worker.
//!
//! Every flag is monotonic and has a single writer for its transition:
//!
//! | flag         | writer     | transition    |
//! |--------------|------------|---------------|
//! | `started`    | worker     | false -> true |
//! | `keep_going` | either     | true -> false |
//! | `stopped`    | worker     | false -> true |
//! | `orphaned`   | controller | false -> true |
//! | `exited`     | worker     | false -> true |
//!
//! Memory is reclaimed by `Arc`, but which side *releases* the block is still
//! decided by `orphaned`, and the release is recorded so exactly one side does
//! it. Each side raises its own flag before reading the other's (`exited` vs
//! `orphaned`, both `SeqCst`), so at least one of them sees the handoff; the
//! swap in [`ControlBlock::release`] makes sure at most one acts on it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tracing::debug;

/// Outcome of the worker's startup, as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    Unset = 0,
    Ok = 1,
    FailConnect = 2,
    FailAuth = 3,
    FailSelect = 4,
    FailSet = 5,
    FailOrphan = 6,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionStatus::Ok,
            2 => ConnectionStatus::FailConnect,
            3 => ConnectionStatus::FailAuth,
            4 => ConnectionStatus::FailSelect,
            5 => ConnectionStatus::FailSet,
            6 => ConnectionStatus::FailOrphan,
            _ => ConnectionStatus::Unset,
        }
    }

    pub fn is_failure(self) -> bool {
        !matches!(self, ConnectionStatus::Unset | ConnectionStatus::Ok)
    }
}

/// Which side of the protocol released the control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Controller,
    Worker,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Controller => write!(f, "controller"),
            Side::Worker => write!(f, "worker"),
        }
    }
}

pub(crate) struct ControlBlock {
    started: AtomicBool,
    keep_going: AtomicBool,
    stopped: AtomicBool,
    orphaned: AtomicBool,
    exited: AtomicBool,
    released: AtomicBool,
    status: AtomicU8,
}

impl ControlBlock {
    pub(crate) fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            keep_going: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            orphaned: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            released: AtomicBool::new(false),
            status: AtomicU8::new(ConnectionStatus::Unset as u8),
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn keep_going(&self) -> bool {
        self.keep_going.load(Ordering::SeqCst)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn is_orphaned(&self) -> bool {
        self.orphaned.load(Ordering::SeqCst)
    }

    pub(crate) fn is_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Status is write-once: the first side to report wins.
    pub(crate) fn set_status(&self, status: ConnectionStatus) -> bool {
        self.status
            .compare_exchange(
                ConnectionStatus::Unset as u8,
                status as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Worker: the liveness key has been published.
    pub(crate) fn mark_started(&self) {
        self.set_status(ConnectionStatus::Ok);
        self.started.store(true, Ordering::SeqCst);
    }

    /// Worker: startup failed; `started` stays false.
    pub(crate) fn fail(&self, status: ConnectionStatus) {
        self.set_status(status);
        self.keep_going.store(false, Ordering::SeqCst);
    }

    /// Worker: the key has been deleted and the connection closed.
    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Worker: last write on every exit path. Returns true when no one is
    /// waiting and the worker must release the block itself.
    pub(crate) fn exit(&self) -> bool {
        self.exited.store(true, Ordering::SeqCst);
        self.orphaned.load(Ordering::SeqCst)
    }

    /// Controller: ask the worker to finish its current cycle and drain.
    pub(crate) fn request_stop(&self) {
        self.keep_going.store(false, Ordering::SeqCst);
    }

    /// Controller: hand ownership to the worker. Returns true when the worker
    /// has already exited, in which case the controller must release instead.
    pub(crate) fn orphan(&self) -> bool {
        self.orphaned.store(true, Ordering::SeqCst);
        self.exited.load(Ordering::SeqCst)
    }

    /// Record the release of the block. Only the first caller gets `true`.
    pub(crate) fn release(&self, side: Side) -> bool {
        let first = !self.released.swap(true, Ordering::SeqCst);
        if first {
            debug!(%side, "released heartbeat control block");
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_block_is_running_and_unset() {
        let block = ControlBlock::new();

        assert!(block.keep_going());
        assert!(!block.is_started());
        assert!(!block.is_stopped());
        assert!(!block.is_orphaned());
        assert!(!block.is_exited());
        assert_eq!(block.status(), ConnectionStatus::Unset);
    }

    #[test]
    fn test_status_is_write_once() {
        let block = ControlBlock::new();

        assert!(block.set_status(ConnectionStatus::FailOrphan));
        block.mark_started();

        assert_eq!(block.status(), ConnectionStatus::FailOrphan);
        assert!(block.is_started());
    }

    #[test]
    fn test_fail_clears_keep_going() {
        let block = ControlBlock::new();
        block.fail(ConnectionStatus::FailAuth);

        assert!(!block.keep_going());
        assert!(!block.is_started());
        assert_eq!(block.status(), ConnectionStatus::FailAuth);
        assert!(block.status().is_failure());
    }

    #[test]
    fn test_release_happens_once() {
        let block = ControlBlock::new();

        assert!(block.release(Side::Worker));
        assert!(!block.release(Side::Controller));
        assert!(block.is_released());
    }

    #[test]
    fn test_orphan_before_exit_hands_release_to_worker() {
        let block = ControlBlock::new();

        assert!(!block.orphan());
        assert!(block.exit());
    }

    #[test]
    fn test_exit_before_orphan_keeps_release_with_controller() {
        let block = ControlBlock::new();

        assert!(!block.exit());
        assert!(block.orphan());
    }

    #[test]
    fn test_concurrent_handoff_releases_exactly_once() {
        use std::sync::Arc;

        for _ in 0..200 {
            let block = Arc::new(ControlBlock::new());
            let worker = {
                let block = block.clone();
                std::thread::spawn(move || block.exit() && block.release(Side::Worker))
            };
            let by_controller = block.orphan() && block.release(Side::Controller);
            let by_worker = worker.join().unwrap();

            assert!(by_controller ^ by_worker);
        }
    }

    #[test]
    fn test_unknown_status_byte_reads_as_unset() {
        assert_eq!(ConnectionStatus::from_u8(42), ConnectionStatus::Unset);
        assert_eq!(ConnectionStatus::from_u8(5), ConnectionStatus::FailSet);
    }
}
