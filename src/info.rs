/// Diagnostic status reporting, triggered by the info signal.
///
/// Emits one record with pid, resident memory, and uptime. Never
/// changes supervisor state.
use std::time::Instant;

use tracing::info;

/// Emit the diagnostic record for the current process.
pub fn process_info(title: &str, started: Instant) {
    let uptime = started.elapsed();
    info!(
        pid = std::process::id(),
        title,
        rss_kib = rss_kib().unwrap_or(0),
        uptime_secs = uptime.as_secs(),
        "process info"
    );
}

/// Resident set size in KiB, best effort.
#[cfg(target_os = "linux")]
fn rss_kib() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn rss_kib() -> Option<u64> {
    None
}

/// Pull the VmRSS figure out of /proc/self/status contents.
fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tprefork\nVmPeak:\t  12000 kB\nVmRSS:\t    8432 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status), Some(8432));
    }

    #[test]
    fn test_parse_vm_rss_missing_line() {
        assert_eq!(parse_vm_rss("Name:\tprefork\nThreads:\t4\n"), None);
        assert_eq!(parse_vm_rss(""), None);
    }

    #[test]
    fn test_parse_vm_rss_malformed_value() {
        assert_eq!(parse_vm_rss("VmRSS:\tnot-a-number kB\n"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_rss_of_current_process_is_nonzero() {
        assert!(rss_kib().unwrap() > 0);
    }
}
