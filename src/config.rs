//! Runtime settings.
//!
//! Settings are layered: built-in defaults, then an optional JSON settings
//! file, then environment variables and CLI flags (both arrive through
//! [`Overrides`]). The resolved [`Settings`] are passed verbatim to worker
//! processes so that every process in a pool sees the same store and
//! calculator.
//!
//! ```json
//! {
//!   "db_path": "/scratch/lj13/jobs.db",
//!   "queue": "lj13",
//!   "workers": 8,
//!   "calculator": { "program": "/opt/relax/bin/dp-relax", "args": ["--fmax", "1e-3"] }
//! }
//! ```

use crate::db::DEFAULT_BUSY_TIMEOUT;
use crate::error::{RelaxError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Queue tag used when none is configured.
pub const DEFAULT_QUEUE: &str = "relax";

/// Pause between peeks while the queue is empty.
pub const DEFAULT_IDLE_INTERVAL_SECS: f64 = 2.0;

/// Upper bound for any configured interval or timeout (one week).
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Convert a user-supplied number of seconds into a [`Duration`].
///
/// Rejects negative, non-finite and out-of-range values instead of
/// panicking in `Duration::from_secs_f64`.
pub fn seconds(value: f64, what: &str) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 || value > MAX_INTERVAL_SECS as f64 {
        return Err(RelaxError::Config(format!(
            "{} must be between 0 and {} seconds, got {}",
            what, MAX_INTERVAL_SECS, value
        )));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| RelaxError::Config(format!("Invalid {}: {}", what, e)))
}

/// How to start the calculator program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalculatorSettings {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory. Defaults to the worker's.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    /// Grace period for the program to exit after an exit request.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl CalculatorSettings {
    /// Calculator with default options.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: BTreeMap::new(),
            workdir: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Path to the SQLite job store.
    pub db_path: PathBuf,
    /// Status flag that makes a job eligible for this runner.
    pub queue: String,
    /// SQLite busy timeout.
    pub busy_timeout_secs: u64,
    /// Worker processes per pool generation.
    pub workers: usize,
    /// Jobs one worker process handles per generation (0 = until empty).
    pub jobs_per_worker: usize,
    /// Idle poll interval.
    pub idle_interval_secs: f64,
    pub calculator: Option<CalculatorSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: paths::get_store_path(),
            queue: DEFAULT_QUEUE.to_string(),
            busy_timeout_secs: DEFAULT_BUSY_TIMEOUT.as_secs(),
            workers: default_workers(),
            jobs_per_worker: 1,
            idle_interval_secs: DEFAULT_IDLE_INTERVAL_SECS,
            calculator: None,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Values from the environment and CLI that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub db_path: Option<PathBuf>,
    pub queue: Option<String>,
    pub busy_timeout_secs: Option<u64>,
    pub workers: Option<usize>,
    pub jobs_per_worker: Option<usize>,
    pub idle_interval_secs: Option<f64>,
    pub calculator: Option<PathBuf>,
    pub calculator_args: Vec<String>,
}

impl Settings {
    /// Load a JSON settings file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RelaxError::Config(format!("Cannot read settings file {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            RelaxError::Config(format!("Invalid settings file {}: {}", path.display(), e))
        })
    }

    /// Defaults, then `file` if given, then `overrides`; validated.
    pub fn resolve(file: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut settings = match file {
            Some(path) => Self::load(&paths::expand_tilde(path))?,
            None => Self::default(),
        };
        settings.apply(overrides);
        settings.db_path = paths::expand_tilde(&settings.db_path);
        settings.validate()?;
        Ok(settings)
    }

    fn apply(&mut self, overrides: Overrides) {
        if let Some(db_path) = overrides.db_path {
            self.db_path = db_path;
        }
        if let Some(queue) = overrides.queue {
            self.queue = queue;
        }
        if let Some(secs) = overrides.busy_timeout_secs {
            self.busy_timeout_secs = secs;
        }
        if let Some(workers) = overrides.workers {
            self.workers = workers;
        }
        if let Some(jobs) = overrides.jobs_per_worker {
            self.jobs_per_worker = jobs;
        }
        if let Some(secs) = overrides.idle_interval_secs {
            self.idle_interval_secs = secs;
        }
        match (overrides.calculator, self.calculator.as_mut()) {
            (Some(program), Some(existing)) => {
                existing.program = program;
                existing.args = overrides.calculator_args;
            }
            (Some(program), None) => {
                self.calculator = Some(CalculatorSettings::new(program, overrides.calculator_args));
            }
            (None, Some(existing)) if !overrides.calculator_args.is_empty() => {
                existing.args = overrides.calculator_args;
            }
            (None, _) => {}
        }
    }

    /// Reject settings that would make the scheduler misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.queue.trim().is_empty() {
            return Err(RelaxError::Config("queue tag must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(RelaxError::Config("workers must be at least 1".into()));
        }
        seconds(self.idle_interval_secs, "idle interval")?;
        if self.busy_timeout_secs > MAX_INTERVAL_SECS {
            return Err(RelaxError::Config(format!(
                "busy timeout must be at most {} seconds, got {}",
                MAX_INTERVAL_SECS, self.busy_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    pub fn idle_interval(&self) -> Result<Duration> {
        seconds(self.idle_interval_secs, "idle interval")
    }

    /// Per-generation job budget; `None` means drain the queue.
    pub fn job_budget(&self) -> Option<usize> {
        (self.jobs_per_worker > 0).then_some(self.jobs_per_worker)
    }

    /// Calculator settings, or an error if none are configured.
    pub fn require_calculator(&self) -> Result<&CalculatorSettings> {
        self.calculator.as_ref().ok_or(RelaxError::NoCalculator)
    }

    /// Compact JSON form handed to worker processes.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.queue, "relax");
        assert_eq!(settings.jobs_per_worker, 1);
        assert_eq!(settings.idle_interval().unwrap(), Duration::from_secs(2));
        assert!(settings.workers >= 1);
        assert!(settings.calculator.is_none());
        assert!(settings.db_path.ends_with("jobs.db"));
    }

    #[test]
    fn test_partial_settings_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "db_path": "/scratch/jobs.db",
                "queue": "lj13",
                "calculator": { "program": "/opt/relax", "args": ["--fmax", "1e-3"] }
            }"#,
        )
        .unwrap();

        let settings = Settings::resolve(Some(&path), Overrides::default()).unwrap();
        assert_eq!(settings.db_path, PathBuf::from("/scratch/jobs.db"));
        assert_eq!(settings.queue, "lj13");
        assert_eq!(settings.jobs_per_worker, 1);
        let calc = settings.require_calculator().unwrap();
        assert_eq!(calc.args, vec!["--fmax", "1e-3"]);
        assert_eq!(calc.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "quue": "typo" }"#).unwrap();
        let err = Settings::resolve(Some(&path), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("Invalid settings file"));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "workers": 2, "calculator": { "program": "/opt/a", "args": ["x"], "workdir": "/tmp" } }"#,
        )
        .unwrap();

        let overrides = Overrides {
            workers: Some(6),
            calculator: Some(PathBuf::from("/opt/b")),
            calculator_args: vec!["y".to_string()],
            ..Default::default()
        };
        let settings = Settings::resolve(Some(&path), overrides).unwrap();
        assert_eq!(settings.workers, 6);
        let calc = settings.require_calculator().unwrap();
        assert_eq!(calc.program, PathBuf::from("/opt/b"));
        assert_eq!(calc.args, vec!["y"]);
        assert_eq!(calc.workdir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_validation() {
        let zero_workers = Overrides {
            workers: Some(0),
            ..Default::default()
        };
        assert!(Settings::resolve(None, zero_workers).is_err());

        let negative_idle = Overrides {
            idle_interval_secs: Some(-1.0),
            ..Default::default()
        };
        assert!(Settings::resolve(None, negative_idle).is_err());

        let empty_queue = Overrides {
            queue: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(Settings::resolve(None, empty_queue).is_err());
    }

    #[test]
    fn test_huge_intervals_are_rejected() {
        let huge_idle = Overrides {
            idle_interval_secs: Some(1e20),
            ..Default::default()
        };
        let err = Settings::resolve(None, huge_idle).unwrap_err();
        assert!(matches!(err, RelaxError::Config(_)));

        let settings = Settings {
            idle_interval_secs: 1e20,
            ..Default::default()
        };
        assert!(settings.idle_interval().is_err());

        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "busy_timeout_secs": 18446744073709551615 }"#).unwrap();
        assert!(Settings::resolve(Some(&path), Overrides::default()).is_err());
    }

    #[test]
    fn test_seconds_conversion() {
        assert_eq!(seconds(0.5, "lock age").unwrap(), Duration::from_millis(500));
        assert_eq!(
            seconds(MAX_INTERVAL_SECS as f64, "lock age").unwrap(),
            Duration::from_secs(MAX_INTERVAL_SECS)
        );
        assert!(seconds(1e20, "lock age").is_err());
        assert!(seconds(f64::NAN, "lock age").is_err());
        assert!(seconds(-0.1, "lock age").is_err());
    }

    #[test]
    fn test_job_budget() {
        let mut settings = Settings::default();
        assert_eq!(settings.job_budget(), Some(1));
        settings.jobs_per_worker = 0;
        assert_eq!(settings.job_budget(), None);
    }

    #[test]
    fn test_json_hand_off() {
        let settings = Settings {
            calculator: Some(CalculatorSettings::new("/opt/relax", vec![])),
            ..Default::default()
        };
        let json = settings.to_json().unwrap();
        assert_eq!(Settings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn test_missing_calculator() {
        let settings = Settings::default();
        assert!(matches!(
            settings.require_calculator(),
            Err(RelaxError::NoCalculator)
        ));
    }
}
