//! PID file management for single-instance enforcement.

use std::path::Path;

use tracing::{debug, info};

/// Write the current process id to `path`.
pub fn write_pid_file(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("failed to create daemon dir: {e}"))?;
    }
    let pid = std::process::id();
    std::fs::write(path, pid.to_string()).map_err(|e| format!("failed to write PID file: {e}"))?;
    info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

pub fn read_pid(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!(error = %e, "failed to remove PID file (may not exist)");
    }
}

/// Whether a process with the given PID exists.
pub fn is_process_alive(pid: u32) -> bool {
    // Values above i32::MAX would turn into process-group ids.
    let Ok(raw_pid) = i32::try_from(pid) else {
        return false;
    };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw_pid), None).is_ok()
}

/// Fail if another live daemon owns the PID file.
pub fn ensure_single_instance(path: &Path) -> Result<(), String> {
    match read_pid(path) {
        Some(pid) if pid != std::process::id() && is_process_alive(pid) => Err(format!(
            "another courier daemon is already running (pid {pid})"
        )),
        Some(pid) => {
            debug!(pid, "removing stale PID file");
            remove_pid_file(path);
            Ok(())
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.pid");
        write_pid_file(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
        remove_pid_file(&path);
        assert_eq!(read_pid(&path), None);
    }

    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(u32::MAX));
    }

    #[test]
    fn own_pid_file_is_not_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.pid");
        write_pid_file(&path).unwrap();
        assert!(ensure_single_instance(&path).is_ok());
    }

    #[test]
    fn garbage_pid_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.pid");
        std::fs::write(&path, "not-a-pid").unwrap();
        assert!(ensure_single_instance(&path).is_ok());
    }
}
