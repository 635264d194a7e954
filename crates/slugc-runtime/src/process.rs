use tracing::{debug, warn};

/// Send `SIGKILL` to the process group led by `pid`, falling back to the
/// process itself when the group is already gone.
///
/// Children are spawned as group leaders, so this reaches any descendants
/// that stayed in the group. Returns `true` if a signal was delivered.
pub fn kill_process_group(pid: u32) -> bool {
    let Ok(pid_i32) = i32::try_from(pid) else {
        warn!("invalid pid {pid}: exceeds i32 range");
        return false;
    };
    if send_signal(-pid_i32, libc::SIGKILL) {
        debug!("sent SIGKILL to process group {pid}");
        return true;
    }
    send_signal(pid_i32, libc::SIGKILL)
}

fn send_signal(target: i32, signal: i32) -> bool {
    // SAFETY: kill() has no memory-safety preconditions; target was derived
    // from a child pid validated via i32::try_from.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(target, signal) };
    if ret == 0 {
        return true;
    }
    let errno = std::io::Error::last_os_error();
    if errno.raw_os_error() != Some(libc::ESRCH) {
        warn!("failed to send signal {signal} to {target}: {errno}");
    }
    false
}
