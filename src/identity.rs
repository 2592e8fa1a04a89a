/// Process identity: title and privilege drop.
///
/// Applied once during init. Failures here are reported to the caller
/// but are never fatal; the process keeps running under its original
/// identity.
use crate::config::SupervisorConfig;
use crate::role::Role;

/// Errors applying process attributes.
#[derive(Debug)]
pub enum IdentityError {
    /// The configured title cannot be represented as a C string.
    InvalidTitle { source: std::ffi::NulError },
    SetTitle { source: nix::Error },
    SetGid { gid: u32, source: nix::Error },
    SetUid { uid: u32, source: nix::Error },
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityError::InvalidTitle { source } => {
                write!(f, "invalid process title: {}", source)
            }
            IdentityError::SetTitle { source } => {
                write!(f, "failed to set process title: {}", source)
            }
            IdentityError::SetGid { gid, source } => {
                write!(f, "failed to setgid({}): {}", gid, source)
            }
            IdentityError::SetUid { uid, source } => {
                write!(f, "failed to setuid({}): {}", uid, source)
            }
        }
    }
}

impl std::error::Error for IdentityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IdentityError::InvalidTitle { source } => Some(source),
            IdentityError::SetTitle { source } => Some(source),
            IdentityError::SetGid { source, .. } => Some(source),
            IdentityError::SetUid { source, .. } => Some(source),
        }
    }
}

/// Apply title, then gid, then uid. Gid must come first: after a uid
/// drop the process may no longer be allowed to change groups.
pub fn apply(role: Role, config: &SupervisorConfig) -> Result<(), IdentityError> {
    let title = match role {
        Role::Master => config.master_title.as_deref(),
        Role::Worker => config.worker_title.as_deref(),
    };
    if let Some(title) = title {
        set_title(title)?;
    }

    if let Some(gid) = config.gid {
        nix::unistd::setgid(nix::unistd::Gid::from_raw(gid))
            .map_err(|e| IdentityError::SetGid { gid, source: e })?;
    }

    if let Some(uid) = config.uid {
        nix::unistd::setuid(nix::unistd::Uid::from_raw(uid))
            .map_err(|e| IdentityError::SetUid { uid, source: e })?;
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn set_title(title: &str) -> Result<(), IdentityError> {
    let name =
        std::ffi::CString::new(title).map_err(|e| IdentityError::InvalidTitle { source: e })?;
    // Kernel truncates to 15 bytes; close enough for the process table
    nix::sys::prctl::set_name(&name).map_err(|e| IdentityError::SetTitle { source: e })
}

#[cfg(not(target_os = "linux"))]
fn set_title(_title: &str) -> Result<(), IdentityError> {
    Ok(())
}
