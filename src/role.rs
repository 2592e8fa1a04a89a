use std::ffi::OsStr;

/// Environment marker set on spawned worker processes.
///
/// The master re-executes its own binary with this variable set; its
/// presence is what makes a process a worker.
pub const WORKER_ENV: &str = "PREFORK_WORKER";

/// Which side of the master/worker split this process is on.
///
/// Fixed at startup and never changes for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Worker,
}

impl Role {
    /// Resolve the role of the current process from the environment.
    pub fn from_env() -> Role {
        Role::from_marker(std::env::var_os(WORKER_ENV).as_deref())
    }

    fn from_marker(marker: Option<&OsStr>) -> Role {
        if marker.is_some() {
            Role::Worker
        } else {
            Role::Master
        }
    }

    pub fn is_master(self) -> bool {
        self == Role::Master
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Worker => write!(f, "worker"),
        }
    }
}
