/// Worker pool manager.
///
/// Owns every [`WorkerHandle`] and provides the only operations that
/// change pool membership: forking, the graceful-then-forced stop
/// path, and the respawn decision on worker exit.
use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{PoolEvent, ProcessBackend, SpawnError};
use crate::worker::{WorkerHandle, WorkerState};

pub struct WorkerPool {
    workers: HashMap<u32, WorkerHandle>,
    backend: Box<dyn ProcessBackend>,
    events: mpsc::UnboundedSender<PoolEvent>,
    target_count: usize,
    grace_period: Duration,
}

impl WorkerPool {
    pub fn new(
        backend: Box<dyn ProcessBackend>,
        events: mpsc::UnboundedSender<PoolEvent>,
        target_count: usize,
        grace_period: Duration,
    ) -> Self {
        Self {
            workers: HashMap::new(),
            backend,
            events,
            target_count,
            grace_period,
        }
    }

    /// Fork `n` new workers, registering a handle for each.
    ///
    /// A spawn failure aborts this call but not the pool: workers
    /// already forked stay registered, and there is no automatic
    /// retry — the pool runs below target until the next exit cycle
    /// or an explicit restart.
    pub fn fork(&mut self, n: usize) -> Result<(), SpawnError> {
        for _ in 0..n {
            let pid = self.backend.spawn(&self.events)?;
            self.workers.insert(pid, WorkerHandle::new(pid));
            info!(pid, "worker forked");
        }
        Ok(())
    }

    /// Visit every tracked worker, in no guaranteed order.
    pub fn each_worker(&self, mut visit: impl FnMut(&WorkerHandle)) {
        for handle in self.workers.values() {
            visit(handle);
        }
    }

    /// Ask every worker to stop: shutdown message, expected-exit mark,
    /// and a one-shot grace timer per worker. Workers still tracked
    /// when their timer fires get SIGKILL.
    pub fn stop_workers(&mut self) {
        for handle in self.workers.values_mut() {
            self.backend.send_shutdown(handle.pid);
            handle.expected_exit = true;
            handle.state = WorkerState::ShuttingDownGraceful;

            let pid = handle.pid;
            let grace = self.grace_period;
            let tx = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = tx.send(PoolEvent::GraceExpired(pid));
            });
            debug!(pid, grace_ms = self.grace_period.as_millis() as u64, "shutdown requested");
        }
    }

    /// Relay the info signal to every worker.
    pub fn relay_info(&self) {
        self.each_worker(|handle| self.backend.relay_info(handle.pid));
    }

    /// Route one asynchronous notification to the right transition.
    pub fn handle_event(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::Online(pid) => self.on_worker_online(pid),
            PoolEvent::Exit { pid, code, signal } => self.on_worker_exit(pid, code, signal),
            PoolEvent::GraceExpired(pid) => self.on_grace_expired(pid),
        }
    }

    /// Starting → Online. Observability only.
    fn on_worker_online(&mut self, pid: u32) {
        if let Some(handle) = self.workers.get_mut(&pid) {
            if handle.state == WorkerState::Starting {
                handle.state = WorkerState::Online;
                info!(pid, "worker online");
            }
        }
    }

    /// A tracked worker terminated. Unexpected exits trigger exactly
    /// one replacement fork; requested exits trigger none. There is
    /// deliberately no retry cap or backoff, so a worker that crashes
    /// on every start will be re-forked indefinitely.
    fn on_worker_exit(&mut self, pid: u32, code: Option<i32>, signal: Option<i32>) {
        let Some(handle) = self.workers.remove(&pid) else {
            debug!(pid, "exit event for untracked worker");
            return;
        };

        if handle.expected_exit {
            info!(pid, code, "worker stopped");
            return;
        }

        warn!(pid, code, signal, "worker exited unexpectedly, respawning");
        match self.fork(1) {
            Ok(()) => debug!(target_count = self.target_count, live = self.live_count(), "pool restored"),
            Err(e) => warn!(error = %e, "respawn failed, pool below target"),
        }
    }

    /// The grace timer for `pid` fired. If the worker is still tracked
    /// it has not exited, so force-kill it; if the handle is already
    /// gone the timer is stale and this is a no-op.
    fn on_grace_expired(&mut self, pid: u32) {
        match self.workers.get(&pid) {
            Some(handle) if handle.state != WorkerState::Terminated => {
                warn!(pid, "worker exceeded grace period, forcing termination");
                self.backend.force_kill(pid);
            }
            _ => debug!(pid, "grace timer fired for already-exited worker"),
        }
    }

    /// Handles in {Starting, Online}.
    pub fn live_count(&self) -> usize {
        self.workers.values().filter(|w| w.is_live()).count()
    }

    /// Total tracked handles, whatever their state.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{MockBackend, MockLog};
    use std::sync::{Arc, Mutex};

    fn pool_with_mock(
        target: usize,
    ) -> (
        WorkerPool,
        Arc<Mutex<MockLog>>,
        mpsc::UnboundedReceiver<PoolEvent>,
    ) {
        let (backend, log) = MockBackend::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(
            Box::new(backend),
            tx,
            target,
            Duration::from_millis(5000),
        );
        (pool, log, rx)
    }

    fn drain_into(pool: &mut WorkerPool, rx: &mut mpsc::UnboundedReceiver<PoolEvent>) {
        while let Ok(ev) = rx.try_recv() {
            pool.handle_event(ev);
        }
    }

    #[tokio::test]
    async fn test_fork_registers_n_starting_workers() {
        let (mut pool, log, _rx) = pool_with_mock(3);
        pool.fork(3).unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.live_count(), 3);
        assert_eq!(log.lock().unwrap().spawned.len(), 3);
        pool.each_worker(|w| assert_eq!(w.state, WorkerState::Starting));
    }

    #[tokio::test]
    async fn test_online_event_transitions_starting_to_online() {
        let (mut pool, _log, mut rx) = pool_with_mock(2);
        pool.fork(2).unwrap();
        drain_into(&mut pool, &mut rx);

        assert_eq!(pool.live_count(), 2);
        pool.each_worker(|w| assert_eq!(w.state, WorkerState::Online));
    }

    #[tokio::test]
    async fn test_unexpected_exit_respawns_exactly_one() {
        let (mut pool, log, mut rx) = pool_with_mock(3);
        pool.fork(3).unwrap();
        drain_into(&mut pool, &mut rx);
        let original: Vec<u32> = log.lock().unwrap().spawned.clone();

        // Kill one out-of-band: crash, not a requested stop
        pool.handle_event(PoolEvent::Exit {
            pid: original[0],
            code: None,
            signal: Some(9),
        });
        drain_into(&mut pool, &mut rx);

        assert_eq!(pool.live_count(), 3);
        let spawned = log.lock().unwrap().spawned.clone();
        assert_eq!(spawned.len(), 4, "exactly one replacement forked");
        // The two survivors keep their pids; one new pid appears
        let mut pids = Vec::new();
        pool.each_worker(|w| pids.push(w.pid));
        pids.sort_unstable();
        assert!(pids.contains(&original[1]));
        assert!(pids.contains(&original[2]));
        assert!(pids.contains(&spawned[3]));
        assert!(!pids.contains(&original[0]));
    }

    #[tokio::test]
    async fn test_expected_exit_does_not_respawn() {
        let (mut pool, log, mut rx) = pool_with_mock(1);
        pool.fork(1).unwrap();
        drain_into(&mut pool, &mut rx);
        let pid = log.lock().unwrap().spawned[0];

        pool.stop_workers();
        pool.handle_event(PoolEvent::Exit {
            pid,
            code: Some(0),
            signal: None,
        });

        assert!(pool.is_empty());
        assert_eq!(log.lock().unwrap().spawned.len(), 1, "no replacement");
    }

    #[tokio::test]
    async fn test_stop_workers_messages_and_marks_every_worker() {
        let (mut pool, log, mut rx) = pool_with_mock(3);
        pool.fork(3).unwrap();
        drain_into(&mut pool, &mut rx);

        pool.stop_workers();

        let mut shutdowns = log.lock().unwrap().shutdowns.clone();
        shutdowns.sort_unstable();
        let mut expected: Vec<u32> = log.lock().unwrap().spawned.clone();
        expected.sort_unstable();
        assert_eq!(shutdowns, expected);
        pool.each_worker(|w| {
            assert!(w.expected_exit);
            assert_eq!(w.state, WorkerState::ShuttingDownGraceful);
        });
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_kills_only_stragglers() {
        let (mut pool, log, mut rx) = pool_with_mock(2);
        pool.fork(2).unwrap();
        drain_into(&mut pool, &mut rx);
        let pids = log.lock().unwrap().spawned.clone();

        pool.stop_workers();
        // Let the grace timers register before touching the clock
        tokio::task::yield_now().await;
        // First worker cooperates within the grace period
        pool.handle_event(PoolEvent::Exit {
            pid: pids[0],
            code: Some(0),
            signal: None,
        });

        // Fire both grace timers
        tokio::time::advance(Duration::from_millis(5000)).await;
        let mut fired = Vec::new();
        while let Some(ev) = rx.recv().await {
            fired.push(ev);
            if fired.len() == 2 {
                break;
            }
        }
        for ev in fired {
            pool.handle_event(ev);
        }

        let kills = log.lock().unwrap().kills.clone();
        assert_eq!(kills, vec![pids[1]], "only the straggler is killed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_timer_does_not_fire_early() {
        let (mut pool, _log, mut rx) = pool_with_mock(1);
        pool.fork(1).unwrap();
        drain_into(&mut pool, &mut rx);

        pool.stop_workers();
        // Let the grace timer register before touching the clock
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(4999)).await;
        assert!(
            rx.try_recv().is_err(),
            "no forced termination before grace expiry"
        );

        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert!(matches!(rx.try_recv(), Ok(PoolEvent::GraceExpired(_))));
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces_but_keeps_pool() {
        let (mut pool, log, _rx) = pool_with_mock(3);
        pool.fork(2).unwrap();
        log.lock().unwrap().fail_next_spawn = true;

        let err = pool.fork(1).unwrap_err();
        assert!(matches!(err, SpawnError::Spawn { .. }));
        assert_eq!(pool.len(), 2, "earlier workers stay registered");
    }

    #[tokio::test]
    async fn test_respawn_failure_leaves_pool_below_target() {
        let (mut pool, log, mut rx) = pool_with_mock(2);
        pool.fork(2).unwrap();
        drain_into(&mut pool, &mut rx);
        let pids = log.lock().unwrap().spawned.clone();

        log.lock().unwrap().fail_next_spawn = true;
        pool.handle_event(PoolEvent::Exit {
            pid: pids[0],
            code: Some(1),
            signal: None,
        });

        // No panic, no retry: pool simply runs short
        assert_eq!(pool.live_count(), 1);
    }

    #[tokio::test]
    async fn test_exit_event_for_untracked_pid_is_harmless() {
        let (mut pool, log, _rx) = pool_with_mock(1);
        pool.fork(1).unwrap();

        pool.handle_event(PoolEvent::Exit {
            pid: 9999,
            code: None,
            signal: Some(9),
        });

        assert_eq!(pool.len(), 1);
        assert_eq!(log.lock().unwrap().spawned.len(), 1);
    }

    #[tokio::test]
    async fn test_relay_info_reaches_every_worker() {
        let (mut pool, log, mut rx) = pool_with_mock(3);
        pool.fork(3).unwrap();
        drain_into(&mut pool, &mut rx);

        pool.relay_info();

        let mut infos = log.lock().unwrap().infos.clone();
        infos.sort_unstable();
        let mut expected = log.lock().unwrap().spawned.clone();
        expected.sort_unstable();
        assert_eq!(infos, expected);
        assert_eq!(pool.live_count(), 3, "info probe changes no state");
    }

    #[tokio::test]
    async fn test_crash_loop_respawns_without_bound() {
        let (mut pool, log, mut rx) = pool_with_mock(1);
        pool.fork(1).unwrap();
        drain_into(&mut pool, &mut rx);

        // Crash the current worker ten times in a row; every crash is
        // answered with a fresh fork.
        for _ in 0..10 {
            let pid = *log.lock().unwrap().spawned.last().unwrap();
            pool.handle_event(PoolEvent::Exit {
                pid,
                code: Some(1),
                signal: None,
            });
            drain_into(&mut pool, &mut rx);
        }

        assert_eq!(log.lock().unwrap().spawned.len(), 11);
        assert_eq!(pool.live_count(), 1);
    }
}
