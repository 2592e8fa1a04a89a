//! Master/worker process supervisor.
//!
//! One master process spawns a pool of N workers (the same executable,
//! re-executed with a role marker) and supervises them: crashed workers
//! are reforked, SIGTERM drains the pool gracefully with a bounded
//! grace period before SIGKILL, SIGUSR1 restarts the pool in place, and
//! SIGUSR2 makes every process report pid/memory/uptime.
//!
//! The embedding application builds a [`SupervisorConfig`], implements
//! [`AppHooks`] for its role-specific setup, and hands both to
//! [`Supervisor::run`]; the same binary runs as master and worker,
//! with [`Role::from_env`] telling the two apart.

pub mod backend;
pub mod config;
pub mod identity;
pub mod info;
pub mod pool;
pub mod role;
pub mod signals;
pub mod supervisor;
pub mod worker;

pub use config::SupervisorConfig;
pub use role::Role;
pub use supervisor::{AppHooks, NoHooks, Supervisor};
