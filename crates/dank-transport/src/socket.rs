//! Socket path resolution and stale socket cleanup.
//!
//! Every daemon process owns exactly one socket named `danklinux-<pid>.sock`.
//! A file whose pid no longer names a live process is garbage and is removed
//! by the next instance that starts.

use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::{AccessFlags, Pid, access, geteuid};
use tracing::debug;

/// File name prefix shared by every daemon socket.
pub const SOCKET_PREFIX: &str = "danklinux";
const SOCKET_SUFFIX: &str = ".sock";

const ROOT_RUN_DIR: &str = "/run";
const ROOT_SOCKET_DIR: &str = "/run/dankdots";
const ROOT_FALLBACK_SOCKET_DIR: &str = "/var/run/dankdots";

/// Directory the socket lives in, resolved from the current environment.
pub fn socket_dir() -> PathBuf {
    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from);
    socket_dir_from(runtime_dir, geteuid().is_root())
}

/// Resolution order: `XDG_RUNTIME_DIR`, then the root-only run directory
/// (or its `/var/run` fallback when `/run` is not writable), then the
/// system temp directory.
pub fn socket_dir_from(runtime_dir: Option<PathBuf>, is_root: bool) -> PathBuf {
    if let Some(dir) = runtime_dir.filter(|d| !d.as_os_str().is_empty()) {
        return dir;
    }
    if is_root {
        if access(ROOT_RUN_DIR, AccessFlags::W_OK).is_ok() {
            return PathBuf::from(ROOT_SOCKET_DIR);
        }
        return PathBuf::from(ROOT_FALLBACK_SOCKET_DIR);
    }
    std::env::temp_dir()
}

/// Socket file name for a given pid.
pub fn socket_file_name(pid: u32) -> String {
    format!("{SOCKET_PREFIX}-{pid}{SOCKET_SUFFIX}")
}

/// Full socket path for this process.
pub fn socket_path() -> PathBuf {
    socket_dir().join(socket_file_name(std::process::id()))
}

/// Extracts the pid from a socket file name. `None` means the name matches
/// the socket pattern but carries no usable pid; names outside the pattern
/// are not ours and yield `Err(())`.
fn parse_socket_pid(name: &str) -> Result<Option<i32>, ()> {
    let pid_part = name
        .strip_prefix(SOCKET_PREFIX)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|rest| rest.strip_suffix(SOCKET_SUFFIX))
        .ok_or(())?;

    // 0 and negative pids address process groups with kill(2).
    Ok(pid_part.parse::<i32>().ok().filter(|pid| *pid > 0))
}

fn process_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Remove stale sockets from the resolved socket directory.
pub fn cleanup_stale_sockets() -> Vec<PathBuf> {
    cleanup_stale_sockets_in(&socket_dir())
}

/// Remove every `danklinux-<pid>.sock` in `dir` whose pid is unparsable or
/// cannot be signalled. Read failures are ignored. Returns what was removed.
pub fn cleanup_stale_sockets_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut removed = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };

        let stale = match parse_socket_pid(name) {
            Err(()) => continue,
            Ok(None) => true,
            Ok(Some(pid)) => !process_alive(pid),
        };
        if !stale {
            continue;
        }

        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed stale socket {}", path.display());
                removed.push(path);
            }
            Err(e) => debug!("Could not remove stale socket {}: {e}", path.display()),
        }
    }
    removed
}
