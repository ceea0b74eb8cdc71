//! Background launch of the scheduler.
//!
//! `relaxd start` re-executes the binary as `relaxd run` in a new process
//! group with its output appended to a log file, records the pid, and
//! returns. Signals sent through a [`LauncherHandle`] go to the whole group,
//! so the scheduler and its current generation of workers drain together.
//! Calculator programs run in their own groups and are shut down by their
//! workers.

use crate::config::Settings;
use crate::error::{RelaxError, Result};
use crate::worker::signals::{TerminationReason, analyze_wait_status};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Options for a background run beyond the resolved settings.
#[derive(Debug, Clone, Default)]
pub struct BackgroundOptions {
    /// File receiving the scheduler's stdout and stderr.
    pub log_path: PathBuf,
    pub verbose: u8,
    pub quiet: bool,
    pub exit_when_idle: bool,
    pub max_generations: Option<u64>,
    /// Run the single in-process worker variant.
    pub single: bool,
}

/// Handle to a background scheduler.
#[derive(Debug)]
pub struct LauncherHandle {
    pid: Pid,
    /// Whether this process spawned it and may reap it.
    owned: bool,
    exited: Option<TerminationReason>,
}

/// Start the scheduler in the background with `pool_size` workers.
pub fn start_background(
    settings: &Settings,
    pool_size: usize,
    options: &BackgroundOptions,
) -> Result<LauncherHandle> {
    let exe = std::env::current_exe()
        .map_err(|e| RelaxError::Launcher(format!("Failed to get current executable: {}", e)))?;

    let mut settings = settings.clone();
    settings.workers = pool_size;
    settings.validate()?;

    let mut cmd = Command::new(exe);
    if options.quiet {
        cmd.arg("--quiet");
    } else if options.verbose > 0 {
        cmd.arg(format!("-{}", "v".repeat(options.verbose as usize)));
    }
    cmd.arg("run")
        .arg("--resolved-settings")
        .arg(settings.to_json()?);
    if options.exit_when_idle {
        cmd.arg("--exit-when-idle");
    }
    if let Some(max) = options.max_generations {
        cmd.arg("--max-generations").arg(max.to_string());
    }
    if options.single {
        cmd.arg("--single");
    }
    // Colour codes are noise in a log file.
    cmd.env("NO_COLOR", "true");

    let handle = spawn_detached(cmd, &options.log_path)?;
    info!(
        pid = handle.pid().as_raw(),
        workers = pool_size,
        log = %options.log_path.display(),
        "Started background scheduler"
    );
    Ok(handle)
}

/// Spawn `cmd` in its own process group with output appended to `log_path`.
pub fn spawn_detached(mut cmd: Command, log_path: &Path) -> Result<LauncherHandle> {
    if let Some(parent) = log_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new().create(true).append(true).open(log_path)?;
    let log_err = log.try_clone()?;

    let child = cmd
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err)
        .process_group(0)
        .spawn()
        .map_err(|e| RelaxError::Launcher(format!("Failed to start scheduler: {}", e)))?;

    Ok(LauncherHandle {
        pid: Pid::from_raw(child.id() as i32),
        owned: true,
        exited: None,
    })
}

impl LauncherHandle {
    /// Attach to a scheduler started by another process.
    pub fn from_pid(pid: Pid) -> Self {
        Self {
            pid,
            owned: false,
            exited: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Whether the scheduler is still running.
    pub fn is_running(&mut self) -> bool {
        if self.exited.is_some() {
            return false;
        }
        if !self.owned {
            return signal::kill(self.pid, None).is_ok() && !is_zombie(self.pid);
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(status) => {
                self.exited = Some(analyze_wait_status(status));
                false
            }
            Err(_) => {
                self.exited = Some(TerminationReason::Unknown);
                false
            }
        }
    }

    /// Wait up to `timeout` for the scheduler to exit.
    ///
    /// For a handle from [`from_pid`](Self::from_pid) the exit status is not
    /// observable and is reported as `Unknown`.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<TerminationReason> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_running() {
                return Some(self.exited.clone().unwrap_or(TerminationReason::Unknown));
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Block until the scheduler exits.
    pub fn wait(&mut self) -> TerminationReason {
        if let Some(reason) = &self.exited {
            return reason.clone();
        }
        if !self.owned {
            while self.is_running() {
                std::thread::sleep(Duration::from_millis(200));
            }
            return TerminationReason::Unknown;
        }
        let reason = loop {
            match waitpid(self.pid, None) {
                Ok(status) => break analyze_wait_status(status),
                Err(Errno::EINTR) => continue,
                Err(_) => break TerminationReason::Unknown,
            }
        };
        self.exited = Some(reason.clone());
        reason
    }

    /// Ask the process group to drain and exit (SIGTERM).
    pub fn terminate(&self) -> Result<()> {
        self.signal_group(Signal::SIGTERM)
    }

    /// Kill the process group at once (SIGKILL). In-flight jobs stay locked.
    pub fn kill(&self) -> Result<()> {
        self.signal_group(Signal::SIGKILL)
    }

    fn signal_group(&self, sig: Signal) -> Result<()> {
        debug!(pid = self.pid.as_raw(), signal = ?sig, "Signalling scheduler group");
        signal::killpg(self.pid, sig).map_err(|e| match e {
            Errno::ESRCH => {
                RelaxError::Launcher(format!("Scheduler {} is not running", self.pid))
            }
            other => RelaxError::Launcher(format!(
                "Failed to send {:?} to scheduler {}: {}",
                sig, self.pid, other
            )),
        })
    }
}

/// An exited process nobody reaped yet still answers signal 0.
fn is_zombie(pid: Pid) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid.as_raw()))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next().map(|s| s == "Z"))
        })
        .unwrap_or(false)
}

/// Record the scheduler pid.
pub fn write_pid_file(path: &Path, pid: Pid) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", pid.as_raw()))?;
    Ok(())
}

/// Read a pid file. `None` if it does not exist.
pub fn read_pid_file(path: &Path) -> Result<Option<Pid>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let raw: i32 = contents.trim().parse().map_err(|_| {
        RelaxError::Launcher(format!("Malformed pid file {}", path.display()))
    })?;
    if raw <= 0 {
        return Err(RelaxError::Launcher(format!(
            "Malformed pid file {}",
            path.display()
        )));
    }
    Ok(Some(Pid::from_raw(raw)))
}

/// Pid of a running scheduler recorded in `path`, if any.
pub fn running_from_pid_file(path: &Path) -> Result<Option<LauncherHandle>> {
    Ok(read_pid_file(path)?
        .map(LauncherHandle::from_pid)
        .and_then(|mut handle| handle.is_running().then_some(handle)))
}

pub fn remove_pid_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
