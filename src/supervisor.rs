/// Lifecycle controller: sequences init/start/stop/restart for both
/// roles and runs the per-role event loop.
///
/// The loop never calls `process::exit` itself; it returns the exit
/// code and the binary performs the actual exit. That keeps every
/// transition, including the terminal ones, observable from tests.
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{OsBackend, PoolEvent, ProcessBackend, SpawnError};
use crate::config::SupervisorConfig;
use crate::identity;
use crate::info;
use crate::pool::WorkerPool;
use crate::role::Role;
use crate::signals::{self, ControlMessage, SignalListener, SupervisorSignal};

/// Process-level lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Running,
    Stopping,
    Stopped,
}

/// Role-specific extension points supplied by the embedding
/// application. All hooks default to doing nothing.
pub trait AppHooks: Send {
    /// Runs on the master after the initial pool fork.
    fn init_master(&mut self) {}
    /// Runs on a worker during init, before signal-driven work begins.
    fn init_worker(&mut self) {}
    /// Runs on a worker when it transitions to Running.
    fn start_worker(&mut self) {}
}

/// Hook set that does nothing.
pub struct NoHooks;

impl AppHooks for NoHooks {}

/// Errors starting the supervisor.
#[derive(Debug)]
pub enum SupervisorError {
    /// Could not bind the OS signal streams.
    Signals { source: std::io::Error },
    /// The initial pool fork failed.
    Fork { source: SpawnError },
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::Signals { source } => {
                write!(f, "failed to install signal handlers: {}", source)
            }
            SupervisorError::Fork { source } => {
                write!(f, "failed to fork initial worker pool: {}", source)
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Signals { source } => Some(source),
            SupervisorError::Fork { source } => Some(source),
        }
    }
}

/// One supervisor per OS process. The role is fixed at construction.
pub struct Supervisor<H: AppHooks> {
    role: Role,
    config: SupervisorConfig,
    hooks: H,
    state: LifecycleState,
    pool: WorkerPool,
    pool_events: mpsc::UnboundedReceiver<PoolEvent>,
    signal_rx: Option<mpsc::UnboundedReceiver<SupervisorSignal>>,
    control_rx: Option<mpsc::UnboundedReceiver<ControlMessage>>,
    /// Set by a master restart: refork once the old pool has drained.
    pending_refork: bool,
    started: Instant,
}

impl<H: AppHooks> Supervisor<H> {
    pub fn new(role: Role, config: SupervisorConfig, hooks: H) -> Self {
        Self::with_backend(role, config, hooks, Box::new(OsBackend::new()))
    }

    /// Build a supervisor on an explicit backend. This is the seam the
    /// tests use to run the full lifecycle without real processes.
    pub fn with_backend(
        role: Role,
        config: SupervisorConfig,
        hooks: H,
        backend: Box<dyn ProcessBackend>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(
            backend,
            events_tx,
            config.worker_count,
            config.grace_period(),
        );
        Self {
            role,
            config,
            hooks,
            state: LifecycleState::Uninitialized,
            pool,
            pool_events: events_rx,
            signal_rx: None,
            control_rx: None,
            pending_refork: false,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Install signal bindings (once), apply process identity, and run
    /// the worker init hook. Identity failures are warnings, not
    /// errors.
    pub fn init(&mut self) -> Result<(), SupervisorError> {
        if self.state != LifecycleState::Uninitialized {
            return Ok(());
        }

        if self.signal_rx.is_none() {
            let listener =
                SignalListener::install().map_err(|e| SupervisorError::Signals { source: e })?;
            self.signal_rx = Some(listener.spawn_forwarder());
        }

        if let Err(e) = identity::apply(self.role, &self.config) {
            warn!(error = %e, "failed to set process attributes, continuing");
        }

        if self.role == Role::Worker {
            if self.control_rx.is_none() {
                self.control_rx = Some(signals::spawn_control_reader());
            }
            self.hooks.init_worker();
        }

        self.state = LifecycleState::Initialized;
        Ok(())
    }

    /// Initialize, then bring the process to Running: the master forks
    /// the configured pool, a worker runs its start hook.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        self.init()?;
        if self.state != LifecycleState::Initialized {
            return Ok(());
        }

        match self.role {
            Role::Master => {
                info!(workers = self.config.worker_count, "starting worker pool");
                self.pool
                    .fork(self.config.worker_count)
                    .map_err(|e| SupervisorError::Fork { source: e })?;
                self.hooks.init_master();
            }
            Role::Worker => self.hooks.start_worker(),
        }

        self.state = LifecycleState::Running;
        Ok(())
    }

    /// Run until a deliberate stop completes; returns the process exit
    /// code for the binary to apply.
    pub async fn run(mut self) -> Result<i32, SupervisorError> {
        if self.state == LifecycleState::Uninitialized {
            self.start()?;
        }
        let code = match self.role {
            Role::Master => self.run_master().await,
            Role::Worker => self.run_worker().await,
        };
        Ok(code)
    }

    async fn run_master(&mut self) -> i32 {
        // start() ran, so the forwarder exists
        let Some(mut signals) = self.signal_rx.take() else {
            return 1;
        };

        loop {
            tokio::select! {
                maybe_sig = signals.recv() => match maybe_sig {
                    Some(sig) => {
                        if let Some(code) = self.on_master_signal(sig) {
                            return code;
                        }
                    }
                    None => return 0,
                },
                maybe_ev = self.pool_events.recv() => match maybe_ev {
                    Some(ev) => {
                        if let Some(code) = self.on_pool_event(ev) {
                            return code;
                        }
                    }
                    None => return 0,
                },
            }
        }
    }

    async fn run_worker(&mut self) -> i32 {
        let Some(mut signals) = self.signal_rx.take() else {
            return 1;
        };
        let Some(mut control) = self.control_rx.take() else {
            return 1;
        };

        loop {
            tokio::select! {
                maybe_sig = signals.recv() => match maybe_sig {
                    Some(SupervisorSignal::Stop) => {
                        if let Some(code) = self.stop(false) {
                            return code;
                        }
                    }
                    Some(SupervisorSignal::Restart) => {
                        if let Some(code) = self.restart() {
                            return code;
                        }
                    }
                    Some(SupervisorSignal::Info) => self.process_info(),
                    None => return 0,
                },
                maybe_msg = control.recv() => match maybe_msg {
                    Some(ControlMessage::Shutdown) => {
                        info!("shutdown message received, exiting");
                        self.state = LifecycleState::Stopped;
                        return 0;
                    }
                    // Master end of the pipe closed: treat as shutdown
                    None => return 0,
                },
            }
        }
    }

    fn on_master_signal(&mut self, sig: SupervisorSignal) -> Option<i32> {
        match sig {
            SupervisorSignal::Stop => self.stop(false),
            SupervisorSignal::Restart => self.restart(),
            SupervisorSignal::Info => {
                self.pool.relay_info();
                self.process_info();
                None
            }
        }
    }

    fn on_pool_event(&mut self, ev: PoolEvent) -> Option<i32> {
        self.pool.handle_event(ev);
        if self.pool.is_empty() {
            if self.pending_refork {
                return self.finish_refork();
            }
            if self.state == LifecycleState::Stopping {
                self.state = LifecycleState::Stopped;
                info!("all workers stopped, master exiting");
                return Some(0);
            }
        }
        None
    }

    /// Begin a deliberate stop. On the master the pool is drained
    /// first; `keep_master_alive` skips the master's own exit so
    /// `restart` can refork into a live master. Idempotent: a second
    /// stop while one is in flight changes nothing.
    fn stop(&mut self, keep_master_alive: bool) -> Option<i32> {
        if !keep_master_alive {
            // A hard stop overrides a restart still waiting to refork
            self.pending_refork = false;
        }
        if matches!(self.state, LifecycleState::Stopping | LifecycleState::Stopped) {
            debug!("stop requested while already stopping");
            return None;
        }
        self.state = LifecycleState::Stopping;

        match self.role {
            Role::Master => {
                info!(workers = self.pool.len(), "stopping worker pool");
                self.pool.stop_workers();
                if keep_master_alive {
                    return None;
                }
                if self.pool.is_empty() {
                    self.state = LifecycleState::Stopped;
                    return Some(0);
                }
                // Exit once the drain completes, in on_pool_event
                None
            }
            Role::Worker => {
                self.state = LifecycleState::Stopped;
                Some(0)
            }
        }
    }

    /// Restart. The master stays alive: it drains the pool through the
    /// usual graceful path and reforks a fresh one once the drain
    /// completes. A worker just exits; the master's respawn path
    /// brings up its replacement.
    fn restart(&mut self) -> Option<i32> {
        match self.role {
            Role::Master => {
                if matches!(
                    self.state,
                    LifecycleState::Stopping | LifecycleState::Stopped
                ) {
                    debug!("restart ignored while stopping");
                    return None;
                }
                info!("restarting worker pool");
                self.pending_refork = true;
                if self.pool.is_empty() {
                    return self.finish_refork();
                }
                self.stop(true)
            }
            Role::Worker => {
                info!("worker restart requested, exiting for respawn");
                self.state = LifecycleState::Stopped;
                Some(0)
            }
        }
    }

    /// The old pool has drained after a restart: fork the new one.
    fn finish_refork(&mut self) -> Option<i32> {
        self.pending_refork = false;
        match self.pool.fork(self.config.worker_count) {
            Ok(()) => {
                info!(workers = self.config.worker_count, "worker pool reforked");
                self.state = LifecycleState::Running;
                None
            }
            Err(e) => {
                warn!(error = %e, "refork after restart failed, master exiting");
                Some(1)
            }
        }
    }

    /// Emit the local diagnostic record.
    fn process_info(&self) {
        let title = match self.role {
            Role::Master => self.config.master_title.as_deref().unwrap_or("prefork-master"),
            Role::Worker => self.config.worker_title.as_deref().unwrap_or("prefork-worker"),
        };
        info::process_info(title, self.started);
    }
}
