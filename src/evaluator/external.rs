//! Calculator backed by an external program.
//!
//! The program is started on first use and kept for the life of the worker
//! process, so an expensive model is loaded once and reused for every job
//! the worker claims. It runs in its own process group: a terminal Ctrl-C
//! reaches the worker, which finishes the current job and then asks the
//! program to exit.

use super::proc::Proc;
use super::protocol::EvalRequest;
use super::{Calculator, EvaluationOutcome};
use crate::config::CalculatorSettings;
use crate::error::{RelaxError, Result};
use crate::store::JobId;
use serde_json::Value;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Grace period for reaping a program that closed its stdout.
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Runs structures through a long-lived calculator program.
pub struct ExternalCalculator {
    settings: CalculatorSettings,
    proc: Option<Proc>,
}

impl ExternalCalculator {
    pub fn new(settings: CalculatorSettings) -> Self {
        Self {
            settings,
            proc: None,
        }
    }

    /// Whether the program is currently running.
    pub fn is_started(&self) -> bool {
        self.proc.is_some()
    }

    fn spawn(&self) -> Result<Proc> {
        let mut cmd = Command::new(&self.settings.program);
        cmd.args(&self.settings.args)
            .envs(&self.settings.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0);
        if let Some(dir) = &self.settings.workdir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            RelaxError::Worker(format!(
                "Failed to start calculator {}: {}",
                self.settings.program.display(),
                e
            ))
        })?;
        let proc = Proc::from_child(child)?;
        info!(
            pid = proc.pid().as_raw(),
            program = %self.settings.program.display(),
            "Started calculator"
        );
        Ok(proc)
    }

    fn running(&mut self) -> Result<&mut Proc> {
        if self.proc.is_none() {
            self.proc = Some(self.spawn()?);
        }
        self.proc
            .as_mut()
            .ok_or_else(|| RelaxError::Worker("Calculator not running".into()))
    }

    /// Describe how the program died, for error messages.
    fn exit_description(&mut self) -> String {
        match self.proc.as_mut().and_then(|p| p.wait_timeout(REAP_TIMEOUT)) {
            Some(reason) => format!("calculator {}", reason),
            None => "calculator closed its output".to_string(),
        }
    }

    /// Ask the program to exit and reap it. A no-op if it was never started.
    pub fn shutdown(&mut self) {
        if let Some(mut proc) = self.proc.take() {
            let reason = proc.stop(self.settings.shutdown_timeout());
            if reason.is_success() {
                debug!(pid = proc.pid().as_raw(), "Calculator exited");
            } else {
                warn!(pid = proc.pid().as_raw(), reason = %reason, "Calculator stopped");
            }
        }
    }
}

impl Calculator for ExternalCalculator {
    fn evaluate(&mut self, job: JobId, structure: &Value) -> Result<EvaluationOutcome> {
        let proc = self.running()?;

        if let Err(e) = proc.send(&EvalRequest::evaluate(job, structure)) {
            let message = format!("{} ({})", self.exit_description(), e);
            return Err(RelaxError::Calculator {
                job: job.get(),
                message,
            });
        }

        match proc.recv()? {
            Some(response) => response
                .into_outcome()
                .map_err(|message| RelaxError::Calculator {
                    job: job.get(),
                    message,
                }),
            None => Err(RelaxError::Calculator {
                job: job.get(),
                message: self.exit_description(),
            }),
        }
    }
}

impl Drop for ExternalCalculator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
