//! Background daemon management over a PID file.
//!
//! `vibesprint daemon start` relaunches the current binary as a detached
//! `run` process, sends its output to `~/.vibesprint/daemon.log`, and
//! records the PID. Liveness checks and shutdown shell out to `kill`, same
//! as the other process plumbing in this crate shells out to `git` and `gh`.

use std::fs;
use std::process::{Command, Stdio};

use anyhow::{bail, Context};

use crate::cmd::SyncCommandErrorContext;
use crate::home;

/// Set on the child process so log lines can tell daemon runs apart.
pub const DAEMON_ENV: &str = "VIBESPRINT_DAEMON";

fn read_pid() -> Option<u32> {
    let path = home::daemon_pid_path().ok()?;
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse().ok()
}

/// Signal 0 checks liveness without delivering anything.
fn pid_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status_with_context()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// PID of the live daemon. A PID file left behind by a dead process is
/// removed on the way through.
pub fn running_pid() -> Option<u32> {
    let pid = read_pid()?;
    if pid_alive(pid) {
        return Some(pid);
    }
    if let Ok(path) = home::daemon_pid_path() {
        let _ = fs::remove_file(path);
    }
    None
}

/// Launch the poll loop as a detached background process.
pub fn start(interval: Option<u64>) -> anyhow::Result<()> {
    if let Some(pid) = running_pid() {
        bail!("daemon already running (pid {pid})");
    }

    let exe = std::env::current_exe().context("cannot locate the vibesprint binary")?;
    let log_path = home::daemon_log_path()?;
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;
    let log_err = log.try_clone().context("failed to clone daemon log handle")?;

    let mut cmd = Command::new(exe);
    cmd.arg("run");
    if let Some(secs) = interval {
        cmd.args(["--interval", &secs.to_string()]);
    }
    cmd.env(DAEMON_ENV, "1")
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err);

    // New process group, so the daemon survives the launching shell.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd.spawn().context("failed to spawn daemon process")?;
    let pid = child.id();
    fs::write(home::daemon_pid_path()?, pid.to_string())?;
    println!("Daemon started (pid {pid}). Logs: {}", log_path.display());
    Ok(())
}

/// Stop the daemon with SIGTERM and clear the PID file.
pub fn stop() -> anyhow::Result<()> {
    let Some(pid) = running_pid() else {
        println!("Daemon is not running.");
        return Ok(());
    };

    let status = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status_with_context()?;
    if !status.success() {
        bail!("kill -TERM {pid} failed");
    }
    let _ = fs::remove_file(home::daemon_pid_path()?);
    println!("Daemon stopped (pid {pid}).");
    Ok(())
}

/// Print whether the daemon is running.
pub fn status() -> anyhow::Result<()> {
    match running_pid() {
        Some(pid) => println!(
            "Daemon running (pid {pid}). Logs: {}",
            home::daemon_log_path()?.display()
        ),
        None => println!("Daemon is not running."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_check_sees_this_process() {
        if which::which("kill").is_err() {
            eprintln!("SKIP: kill not found");
            return;
        }
        assert!(pid_alive(std::process::id()));
        // Far beyond any real PID; must parse but never match a process.
        assert!(!pid_alive(4_294_967_294));
    }
}
