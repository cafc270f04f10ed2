//! Paths under the `~/.vibesprint/` home directory.
//!
//! Everything the process persists lives here: the JSON config, per-issue
//! logs, and the daemon PID/log files.

use std::path::PathBuf;

const HOME_DIR: &str = ".vibesprint";

/// Get the vibesprint home directory (~/.vibesprint/), creating it if needed.
pub fn vibesprint_home() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    let path = home.join(HOME_DIR);
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Path to the config file (~/.vibesprint/config.json).
pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(vibesprint_home()?.join("config.json"))
}

/// Per-issue log directory (~/.vibesprint/logs/), created on demand.
pub fn logs_dir() -> anyhow::Result<PathBuf> {
    let dir = vibesprint_home()?.join("logs");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Path to the daemon PID file (~/.vibesprint/daemon.pid).
pub fn daemon_pid_path() -> anyhow::Result<PathBuf> {
    Ok(vibesprint_home()?.join("daemon.pid"))
}

/// Path to the daemon log file (~/.vibesprint/daemon.log).
pub fn daemon_log_path() -> anyhow::Result<PathBuf> {
    Ok(vibesprint_home()?.join("daemon.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_paths_share_the_same_root() {
        // All derived paths hang off the same directory name.
        let config = config_path().unwrap();
        let pid = daemon_pid_path().unwrap();
        assert_eq!(config.parent(), pid.parent());
        assert!(config.ends_with(".vibesprint/config.json"));
    }

    #[test]
    fn logs_dir_is_created() {
        let dir = logs_dir().unwrap();
        assert!(dir.is_dir());
        assert!(dir.ends_with(".vibesprint/logs"));
    }
}
