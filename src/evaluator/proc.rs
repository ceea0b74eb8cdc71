//! Process handle for a calculator program.
//!
//! Wraps the child with its stdin/stdout pipes and reaps it with `waitpid`
//! so the termination reason is available when it dies mid-evaluation.

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{EvalRequest, EvalResponse};
use crate::error::{RelaxError, Result};
use crate::worker::signals::{TerminationReason, analyze_wait_status};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

/// Handle to a running calculator with its IPC channels.
pub struct Proc {
    pid: Pid,
    writer: LineWriter,
    reader: LineReader,
    reaped: Option<TerminationReason>,
}

impl Proc {
    /// Take ownership of a spawned child's stdin and stdout.
    pub fn from_child(mut child: std::process::Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RelaxError::Protocol("Calculator stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelaxError::Protocol("Calculator stdout not captured".into()))?;

        Ok(Self {
            pid,
            writer: LineWriter::new(PipeFd::new(stdin)),
            reader: LineReader::new(PipeFd::new(stdout)),
            reaped: None,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Send a request line.
    pub fn send(&mut self, request: &EvalRequest) -> Result<()> {
        let line = request.to_line()?;
        self.writer
            .write_line(&line)
            .map_err(|e| RelaxError::Protocol(format!("Failed to send to calculator: {}", e)))
    }

    /// Receive one response. `None` if the calculator closed its stdout.
    pub fn recv(&mut self) -> Result<Option<EvalResponse>> {
        match self.reader.read_line() {
            Ok(Some(line)) => EvalResponse::from_line(line)
                .map(Some)
                .map_err(|e| RelaxError::Protocol(format!("Invalid calculator response: {}", e))),
            Ok(None) => Ok(None),
            Err(e) => Err(RelaxError::Protocol(format!(
                "Failed to receive from calculator: {}",
                e
            ))),
        }
    }

    /// Reap without blocking. `None` while the process is still running.
    pub fn try_wait(&mut self) -> Option<TerminationReason> {
        if self.reaped.is_some() {
            return self.reaped.clone();
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => None,
            Ok(status) => {
                self.reaped = Some(analyze_wait_status(status));
                self.reaped.clone()
            }
            Err(_) => {
                self.reaped = Some(TerminationReason::Unknown);
                self.reaped.clone()
            }
        }
    }

    /// Wait up to `timeout` for the process to exit on its own.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<TerminationReason> {
        let start = Instant::now();
        loop {
            if let Some(reason) = self.try_wait() {
                return Some(reason);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Ask the calculator to exit, escalating to SIGTERM then SIGKILL.
    pub fn stop(&mut self, timeout: Duration) -> TerminationReason {
        if let Some(reason) = self.try_wait() {
            return reason;
        }

        let _ = self.send(&EvalRequest::Exit);
        if let Some(reason) = self.wait_timeout(timeout) {
            return reason;
        }

        let _ = signal::kill(self.pid, Signal::SIGTERM);
        if let Some(reason) = self.wait_timeout(Duration::from_millis(200)) {
            return reason;
        }

        let _ = signal::kill(self.pid, Signal::SIGKILL);
        let reason = match waitpid(self.pid, None) {
            Ok(status) => analyze_wait_status(status),
            Err(_) => TerminationReason::Unknown,
        };
        self.reaped = Some(reason.clone());
        reason
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if self.reaped.is_none() {
            self.stop(Duration::from_secs(1));
        }
    }
}
