use std::process::ExitStatus;

use tokio::process::{Child, Command};

/// Start the child in a process group of its own, so `terminate` can take
/// down everything it spawned.
pub(crate) fn own_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Forcibly kill the child (and its process group) and reap it.
pub(crate) async fn terminate(child: &mut Child) {
    kill_process_group(child.id());

    if let Err(e) = child.start_kill() {
        log::debug!("Kill request failed, child probably already exited: {e}");
    }
    if let Err(e) = child.wait().await {
        log::warn!("Failed to reap killed child: {e}");
    }
}

/// Kill whatever is left in the process group led by `pid`.
///
/// `pid` is the leader's id captured at spawn. The leader may already be
/// reaped: the group id stays reserved while any member is alive, and an
/// empty group makes the call a no-op.
#[cfg(unix)]
pub(crate) fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        log::trace!(
            "Process group {pid} already gone: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
pub(crate) fn kill_process_group(_pid: Option<u32>) {}

/// Name of the signal that terminated the process, if any
#[cfg(unix)]
pub fn exit_signal(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(signal_name)
}

#[cfg(not(unix))]
pub fn exit_signal(_status: &ExitStatus) -> Option<String> {
    None
}

#[cfg(unix)]
pub fn signal_name(signal: i32) -> String {
    let name = match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGXCPU => "SIGXCPU",
        libc::SIGXFSZ => "SIGXFSZ",
        _ => return format!("signal {signal}"),
    };
    name.to_string()
}
