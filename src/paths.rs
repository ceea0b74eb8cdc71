//! Path utilities for relaxd data storage.

use std::path::{Path, PathBuf};

/// Default job store filename.
pub const STORE_FILENAME: &str = "jobs.db";

/// Pid file written by `relaxd start`.
pub const PID_FILENAME: &str = "relaxd.pid";

/// Log file for background runs.
pub const LOG_FILENAME: &str = "relaxd.log";

/// Get the data directory for relaxd.
///
/// Uses XDG base directory specification on Linux/macOS:
/// - Linux: `~/.local/share/relaxd`
/// - macOS: `~/Library/Application Support/relaxd`
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("relaxd"))
        .unwrap_or_else(|| PathBuf::from(".relaxd"))
}

/// Get the default path of the job store.
pub fn get_store_path() -> PathBuf {
    get_data_dir().join(STORE_FILENAME)
}

/// Pid file sitting next to the store.
pub fn get_pid_path_for_store<P: AsRef<Path>>(store: P) -> PathBuf {
    sibling(store.as_ref(), PID_FILENAME)
}

/// Background log file sitting next to the store.
pub fn get_log_path_for_store<P: AsRef<Path>>(store: P) -> PathBuf {
    sibling(store.as_ref(), LOG_FILENAME)
}

fn sibling(store: &Path, name: &str) -> PathBuf {
    match store.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => PathBuf::from(name),
    }
}

/// Expands a leading `~` in a path to the user's home directory.
///
/// This handles the case where shell tilde expansion doesn't occur,
/// such as `--db-path=~/jobs.db` or a path read from a settings file.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use relaxd::paths::expand_tilde;
///
/// let path = PathBuf::from("/tmp/jobs.db");
/// assert_eq!(expand_tilde(&path), path);
/// ```
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    path.to_path_buf()
}
