//! Worker subprocess spawning.
//!
//! Workers re-execute the current binary in `--internal-worker` mode and
//! receive the resolved settings as a JSON argument, so every process in a
//! generation uses the same store, queue and calculator.

use crate::config::Settings;
use crate::error::{RelaxError, Result};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

/// Everything needed to start a worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    exe: PathBuf,
    settings_json: String,
    verbose: u8,
    quiet: bool,
}

impl WorkerCommand {
    /// Build the command for `settings`, forwarding the parent's verbosity.
    pub fn new(settings: &Settings, verbose: u8, quiet: bool) -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| RelaxError::Worker(format!("Failed to get current executable: {}", e)))?;
        Ok(Self {
            exe,
            settings_json: settings.to_json()?,
            verbose,
            quiet,
        })
    }

    fn command(&self, worker_id: usize) -> Command {
        let mut cmd = Command::new(&self.exe);
        if self.quiet {
            cmd.arg("--quiet");
        } else if self.verbose > 0 {
            cmd.arg(format!("-{}", "v".repeat(self.verbose as usize)));
        }
        cmd.arg("run")
            .arg("--internal-worker")
            .arg("--worker-id")
            .arg(worker_id.to_string())
            .arg("--resolved-settings")
            .arg(&self.settings_json);

        // Workers stay in the scheduler's process group so a terminal Ctrl-C
        // or a launcher SIGTERM reaches all of them.
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd
    }

    /// Start worker `worker_id`.
    pub fn spawn(&self, worker_id: usize) -> Result<Child> {
        self.command(worker_id)
            .spawn()
            .map_err(|e| RelaxError::Worker(format!("Failed to spawn worker {}: {}", worker_id, e)))
    }
}
