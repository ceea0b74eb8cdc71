//! Command-line interface definitions using clap.

use crate::config::{Overrides, Settings};
use crate::error::Result;
use crate::output::OutputFormat;
use crate::store::{JobId, JobState};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Run structure relaxations from a shared job store with a pool of workers.
#[derive(Parser, Debug)]
#[command(name = "relaxd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the job store (defaults to the data directory).
    #[arg(long, global = true, env = "RELAXD_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Queue tag that makes a job eligible.
    #[arg(long, global = true, env = "RELAXD_QUEUE")]
    pub queue: Option<String>,

    /// JSON settings file.
    #[arg(long, global = true, env = "RELAXD_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler in the foreground.
    Run(RunArgs),

    /// Start the scheduler in the background.
    Start(StartArgs),

    /// Stop a background scheduler.
    Stop(StopArgs),

    /// Add structures to the job store.
    Submit(SubmitArgs),

    /// Show per-state job counts.
    Status(StatusArgs),

    /// List jobs.
    List(ListArgs),

    /// Release locks left by dead workers.
    Unlock(UnlockArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Scheduler options shared by `run` and `start`.
#[derive(Args, Debug, Clone, Default)]
pub struct SchedulerArgs {
    /// Worker processes per generation.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Jobs each worker handles per generation (0 = until the store is empty).
    #[arg(long)]
    pub jobs_per_worker: Option<usize>,

    /// Seconds to sleep between peeks of an empty store.
    #[arg(long, value_name = "SECS")]
    pub idle_interval: Option<f64>,

    /// Calculator program speaking the relaxd line protocol.
    #[arg(long, env = "RELAXD_CALCULATOR")]
    pub calculator: Option<PathBuf>,

    /// Argument passed to the calculator (repeatable).
    #[arg(long = "calculator-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub calculator_args: Vec<String>,

    /// Exit at the first empty peek instead of waiting for new jobs.
    #[arg(long)]
    pub exit_when_idle: bool,

    /// Stop after this many generations.
    #[arg(long)]
    pub max_generations: Option<u64>,

    /// Run one worker inside the scheduler process.
    #[arg(long)]
    pub single: bool,
}

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub scheduler: SchedulerArgs,

    /// Run as a pool worker (internal use).
    #[arg(long, hide = true, requires = "resolved_settings")]
    pub internal_worker: bool,

    /// Worker index within its generation (internal use).
    #[arg(long, hide = true, default_value_t = 0)]
    pub worker_id: usize,

    /// Fully resolved settings as JSON (internal use).
    #[arg(long, hide = true)]
    pub resolved_settings: Option<String>,
}

/// Arguments for the start command.
#[derive(Args, Debug)]
pub struct StartArgs {
    #[command(flatten)]
    pub scheduler: SchedulerArgs,

    /// Pid file (defaults to relaxd.pid next to the store).
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Log file (defaults to relaxd.log next to the store).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Arguments for the stop command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Kill immediately instead of letting workers finish their jobs.
    #[arg(long)]
    pub kill: bool,

    /// Pid file (defaults to relaxd.pid next to the store).
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Seconds to wait for the scheduler to exit.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

/// Arguments for the submit command.
#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// JSON file with one structure or an array of structures ('-' for stdin).
    pub file: PathBuf,

    /// Extra status flag to set on each job (repeatable).
    #[arg(long = "flag", value_name = "NAME")]
    pub flags: Vec<String>,
}

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Table)]
    pub format: OutputFormatArg,

    /// Use ASCII table borders instead of Unicode.
    #[arg(long)]
    pub ascii: bool,
}

/// Arguments for the list command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show jobs in this state.
    #[arg(short, long, value_enum)]
    pub state: Option<StateArg>,

    /// Limit number of results (0 for unlimited).
    #[arg(short = 'n', long, default_value_t = 50)]
    pub limit: usize,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Table)]
    pub format: OutputFormatArg,

    /// Show the point group column.
    #[arg(long)]
    pub show_label: bool,

    /// Use ASCII table borders instead of Unicode.
    #[arg(long)]
    pub ascii: bool,
}

/// Arguments for the unlock command.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct UnlockArgs {
    /// Jobs to unlock.
    pub ids: Vec<JobId>,

    /// Unlock every job locked for longer than this many seconds.
    #[arg(long, value_name = "SECS")]
    pub stuck_for: Option<f64>,
}

/// Arguments for shell completions.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "relaxd",
            &mut std::io::stdout(),
        );
    }
}

/// Output format argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormatArg {
    /// Colored table output.
    #[default]
    Table,
    /// JSON output.
    Json,
    /// Plain text output (no colors).
    Plain,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Table => OutputFormat::Table,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Plain => OutputFormat::Plain,
        }
    }
}

/// Job state filter.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum StateArg {
    Pending,
    Locked,
    Completed,
    Ineligible,
}

impl From<StateArg> for JobState {
    fn from(arg: StateArg) -> Self {
        match arg {
            StateArg::Pending => JobState::Pending,
            StateArg::Locked => JobState::Locked,
            StateArg::Completed => JobState::Completed,
            StateArg::Ineligible => JobState::Ineligible,
        }
    }
}

impl Cli {
    /// CLI and environment values that override the settings file.
    pub fn overrides(&self, scheduler: Option<&SchedulerArgs>) -> Overrides {
        let mut overrides = Overrides {
            db_path: self.db_path.clone(),
            queue: self.queue.clone(),
            ..Default::default()
        };
        if let Some(args) = scheduler {
            overrides.workers = args.workers;
            overrides.jobs_per_worker = args.jobs_per_worker;
            overrides.idle_interval_secs = args.idle_interval;
            overrides.calculator = args.calculator.clone();
            overrides.calculator_args = args.calculator_args.clone();
        }
        overrides
    }

    /// Resolve settings for a command.
    pub fn resolve_settings(&self, scheduler: Option<&SchedulerArgs>) -> Result<Settings> {
        Settings::resolve(self.settings.as_deref(), self.overrides(scheduler))
    }

    /// Whether this invocation runs the scheduler or a worker.
    pub fn is_long_running(&self) -> bool {
        matches!(self.command, Commands::Run(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command() {
        let args = Cli::try_parse_from([
            "relaxd",
            "run",
            "--workers",
            "4",
            "--calculator",
            "/opt/relax",
            "--calculator-arg",
            "--fmax",
            "--calculator-arg",
            "1e-3",
            "--exit-when-idle",
        ])
        .unwrap();
        match &args.command {
            Commands::Run(run) => {
                assert_eq!(run.scheduler.workers, Some(4));
                assert_eq!(run.scheduler.calculator_args, vec!["--fmax", "1e-3"]);
                assert!(run.scheduler.exit_when_idle);
                assert!(!run.internal_worker);
            }
            _ => panic!("Expected Run command"),
        }
        assert!(args.is_long_running());
    }

    #[test]
    fn test_internal_worker_requires_settings() {
        assert!(Cli::try_parse_from(["relaxd", "run", "--internal-worker"]).is_err());
        let args = Cli::try_parse_from([
            "relaxd",
            "run",
            "--internal-worker",
            "--worker-id",
            "3",
            "--resolved-settings",
            "{}",
        ])
        .unwrap();
        match args.command {
            Commands::Run(run) => {
                assert!(run.internal_worker);
                assert_eq!(run.worker_id, 3);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_submit_flags() {
        let args =
            Cli::try_parse_from(["relaxd", "submit", "-", "--flag", "lj13", "--flag", "seed"])
                .unwrap();
        match args.command {
            Commands::Submit(submit) => {
                assert_eq!(submit.file, PathBuf::from("-"));
                assert_eq!(submit.flags, vec!["lj13", "seed"]);
            }
            _ => panic!("Expected Submit command"),
        }
    }

    #[test]
    fn test_list_defaults() {
        let args = Cli::try_parse_from(["relaxd", "list", "--state", "locked"]).unwrap();
        match args.command {
            Commands::List(list) => {
                assert!(matches!(list.state, Some(StateArg::Locked)));
                assert_eq!(list.limit, 50);
                assert!(matches!(list.format, OutputFormatArg::Table));
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_unlock_ids_or_stuck_for() {
        let args = Cli::try_parse_from(["relaxd", "unlock", "3", "9"]).unwrap();
        match args.command {
            Commands::Unlock(unlock) => {
                assert_eq!(unlock.ids, vec![JobId::new(3), JobId::new(9)]);
                assert!(unlock.stuck_for.is_none());
            }
            _ => panic!("Expected Unlock command"),
        }

        assert!(Cli::try_parse_from(["relaxd", "unlock", "--stuck-for", "3600"]).is_ok());
        assert!(Cli::try_parse_from(["relaxd", "unlock"]).is_err());
        assert!(Cli::try_parse_from(["relaxd", "unlock", "3", "--stuck-for", "60"]).is_err());
        assert!(Cli::try_parse_from(["relaxd", "unlock", "zero"]).is_err());
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let args =
            Cli::try_parse_from(["relaxd", "status", "-vv", "--no-color", "--queue", "lj13"])
                .unwrap();
        assert_eq!(args.verbose, 2);
        assert!(args.no_color);
        assert_eq!(args.queue.as_deref(), Some("lj13"));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["relaxd", "-v", "-q", "status"]).is_err());
    }

    #[test]
    fn test_overrides() {
        let args = Cli::try_parse_from([
            "relaxd",
            "--db-path",
            "/scratch/jobs.db",
            "start",
            "--workers",
            "8",
            "--jobs-per-worker",
            "0",
        ])
        .unwrap();
        let Commands::Start(start) = &args.command else {
            panic!("Expected Start command");
        };
        let overrides = args.overrides(Some(&start.scheduler));
        assert_eq!(overrides.db_path, Some(PathBuf::from("/scratch/jobs.db")));
        assert_eq!(overrides.workers, Some(8));
        assert_eq!(overrides.jobs_per_worker, Some(0));
    }
}
