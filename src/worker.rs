/// Lifecycle state of one supervised worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Forked, not yet reported running by the OS.
    Starting,
    /// Reported running.
    Online,
    /// Asked to stop; grace timer is ticking.
    ShuttingDownGraceful,
    /// The OS reported the process gone.
    Terminated,
}

/// Bookkeeping for one live worker OS process.
///
/// Owned exclusively by the pool; removed when the underlying process
/// exits, clean or not.
#[derive(Debug)]
pub struct WorkerHandle {
    pub pid: u32,
    pub state: WorkerState,
    /// True once the master deliberately asked this worker to stop.
    /// Suppresses the automatic respawn on exit.
    pub expected_exit: bool,
}

impl WorkerHandle {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            state: WorkerState::Starting,
            expected_exit: false,
        }
    }

    /// Counts toward the steady-state pool size.
    pub fn is_live(&self) -> bool {
        matches!(self.state, WorkerState::Starting | WorkerState::Online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_handle_is_starting_and_unexpected() {
        let handle = WorkerHandle::new(42);
        assert_eq!(handle.pid, 42);
        assert_eq!(handle.state, WorkerState::Starting);
        assert!(!handle.expected_exit);
    }

    #[test]
    fn test_is_live() {
        let mut handle = WorkerHandle::new(1);
        assert!(handle.is_live());
        handle.state = WorkerState::Online;
        assert!(handle.is_live());
        handle.state = WorkerState::ShuttingDownGraceful;
        assert!(!handle.is_live());
        handle.state = WorkerState::Terminated;
        assert!(!handle.is_live());
    }
}
