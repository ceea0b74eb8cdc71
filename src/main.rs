//! relaxd - structure relaxation job runner

use anyhow::{Context, Result, bail};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use std::io::Read;
use std::time::Duration;
use tracing::{Level, info};

use relaxd::cli::{self, Cli, Commands};
use relaxd::config::{self, Settings};
use relaxd::evaluator::ExternalCalculator;
use relaxd::launcher::{self, BackgroundOptions};
use relaxd::logging::{self, LogConfig};
use relaxd::output::{self, TableOptions};
use relaxd::paths;
use relaxd::store::{JobStore, SqliteStore};
use relaxd::theme::{self, Themed};
use relaxd::worker::{
    self, InlineLauncher, PoolScheduler, ProcessLauncher, SchedulerConfig, WorkerLoop,
};

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        theme::disable_colors();
    }
    init_logging(&cli);

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::Start(args) => cmd_start(&cli, args),
        Commands::Stop(args) => cmd_stop(&cli, args),
        Commands::Submit(args) => cmd_submit(&cli, args),
        Commands::Status(args) => cmd_status(&cli, args),
        Commands::List(args) => cmd_list(&cli, args),
        Commands::Unlock(args) => cmd_unlock(&cli, args),
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let mut config = if cli.is_long_running() {
        LogConfig::for_scheduler()
    } else {
        LogConfig::for_cli()
    };
    if cli.quiet {
        config = config.with_level(Level::ERROR).with_filter("error".to_string());
    } else if let Some(filter) = logging::verbosity_filter(cli.verbose) {
        config = config.with_filter(filter);
    }
    logging::init(config.with_ansi(theme::colors_enabled()).with_env_overrides());
}

fn cmd_run(cli: &Cli, args: &cli::RunArgs) -> Result<()> {
    let settings = match &args.resolved_settings {
        Some(json) => Settings::from_json(json).context("Invalid resolved settings")?,
        None => cli.resolve_settings(Some(&args.scheduler))?,
    };

    if args.internal_worker {
        worker::run_worker_main(args.worker_id, &settings);
    }

    let calculator = settings.require_calculator()?.clone();
    let shutdown = worker::shutdown_flag()?;
    let peek_store = SqliteStore::open(&settings.db_path, &settings.queue, settings.busy_timeout())
        .with_context(|| format!("Failed to open job store {}", settings.db_path.display()))?;

    let mut config = SchedulerConfig::from_settings(&settings)?;
    config.exit_when_idle = args.scheduler.exit_when_idle;
    config.max_generations = args.scheduler.max_generations;

    info!(
        db = %settings.db_path.display(),
        queue = %settings.queue,
        calculator = %calculator.program.display(),
        "Starting scheduler"
    );

    let stats = if args.scheduler.single {
        config.pool_size = 1;
        let store = SqliteStore::open(&settings.db_path, &settings.queue, settings.busy_timeout())?;
        let worker = WorkerLoop::new(store, ExternalCalculator::new(calculator))
            .with_budget(settings.job_budget())
            .with_shutdown(shutdown.clone());
        PoolScheduler::new(peek_store, InlineLauncher::new(worker), config)
            .with_shutdown(shutdown)
            .run_forever()?
    } else {
        let launcher = ProcessLauncher::new(&settings, cli.verbose, cli.quiet)?;
        PoolScheduler::new(peek_store, launcher, config)
            .with_shutdown(shutdown)
            .run_forever()?
    };

    info!(
        generations = stats.generations,
        workers = stats.workers_launched,
        failures = stats.worker_failures,
        "Scheduler stopped"
    );
    Ok(())
}

fn cmd_start(cli: &Cli, args: &cli::StartArgs) -> Result<()> {
    let settings = cli.resolve_settings(Some(&args.scheduler))?;
    settings.require_calculator()?;

    let pid_path = args
        .pid_file
        .clone()
        .unwrap_or_else(|| paths::get_pid_path_for_store(&settings.db_path));
    if let Some(handle) = launcher::running_from_pid_file(&pid_path)? {
        bail!(
            "A scheduler is already running (pid {}, pid file {})",
            handle.pid(),
            pid_path.display()
        );
    }

    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| paths::get_log_path_for_store(&settings.db_path));
    let options = BackgroundOptions {
        log_path: log_path.clone(),
        verbose: cli.verbose,
        quiet: cli.quiet,
        exit_when_idle: args.scheduler.exit_when_idle,
        max_generations: args.scheduler.max_generations,
        single: args.scheduler.single,
    };

    let handle = launcher::start_background(&settings, settings.workers, &options)?;
    launcher::write_pid_file(&pid_path, handle.pid())?;

    println!(
        "{} scheduler with {} workers (pid {})",
        "Started".success(),
        settings.workers.count(),
        handle.pid()
    );
    println!("{} {}", "Log file:".label(), log_path.display());
    Ok(())
}

fn cmd_stop(cli: &Cli, args: &cli::StopArgs) -> Result<()> {
    let pid_path = match &args.pid_file {
        Some(path) => path.clone(),
        None => paths::get_pid_path_for_store(&cli.resolve_settings(None)?.db_path),
    };

    let Some(mut handle) = launcher::running_from_pid_file(&pid_path)? else {
        launcher::remove_pid_file(&pid_path)?;
        println!("No running scheduler found.");
        return Ok(());
    };

    if args.kill {
        handle.kill()?;
    } else {
        handle.terminate()?;
    }

    match handle.wait_timeout(Duration::from_secs(args.timeout)) {
        Some(_) => {
            launcher::remove_pid_file(&pid_path)?;
            println!("{} scheduler (pid {})", "Stopped".success(), handle.pid());
        }
        None => {
            println!(
                "{} scheduler (pid {}) is still finishing its current jobs; use --kill to stop it now",
                "Waiting:".warning(),
                handle.pid()
            );
        }
    }
    Ok(())
}

fn read_structures(path: &std::path::Path) -> Result<Vec<serde_json::Value>> {
    let text = if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read structures from stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };

    let value: serde_json::Value =
        serde_json::from_str(&text).context("Structures must be valid JSON")?;
    Ok(match value {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    })
}

fn cmd_submit(cli: &Cli, args: &cli::SubmitArgs) -> Result<()> {
    let settings = cli.resolve_settings(None)?;
    let structures = read_structures(&args.file)?;
    if structures.is_empty() {
        bail!("No structures to submit");
    }

    let mut store = SqliteStore::open(&settings.db_path, &settings.queue, settings.busy_timeout())?;
    let ids = structures
        .iter()
        .map(|structure| store.insert(structure, &args.flags))
        .collect::<relaxd::error::Result<Vec<_>>>()?;

    let first = ids.first().map(|id| id.to_string()).unwrap_or_default();
    let last = ids.last().map(|id| id.to_string()).unwrap_or_default();
    println!(
        "{} {} job(s) to queue '{}' (ids {}..{})",
        "Submitted".success(),
        ids.len().count(),
        settings.queue,
        first.job_id(),
        last.job_id()
    );
    Ok(())
}

fn cmd_status(cli: &Cli, args: &cli::StatusArgs) -> Result<()> {
    let settings = cli.resolve_settings(None)?;
    let store =
        SqliteStore::open_existing(&settings.db_path, &settings.queue, settings.busy_timeout())?;
    let stats = store.stats()?;

    let format: output::OutputFormat = args.format.into();
    if format == output::OutputFormat::Table {
        println!("{} {}", "Job store:".label(), settings.db_path.display());
        let pid_path = paths::get_pid_path_for_store(&settings.db_path);
        match launcher::running_from_pid_file(&pid_path)? {
            Some(handle) => println!("{} running (pid {})", "Scheduler:".label(), handle.pid()),
            None => println!("{} {}", "Scheduler:".label(), "not running".muted()),
        }
    }
    output::print_stats(
        &stats,
        format,
        TableOptions {
            ascii: args.ascii,
            ..Default::default()
        },
    );
    Ok(())
}

fn cmd_list(cli: &Cli, args: &cli::ListArgs) -> Result<()> {
    let settings = cli.resolve_settings(None)?;
    let store =
        SqliteStore::open_existing(&settings.db_path, &settings.queue, settings.busy_timeout())?;
    let jobs = store.list(args.state.map(Into::into), args.limit)?;

    output::print_jobs(
        &jobs,
        args.format.into(),
        TableOptions {
            show_label: args.show_label,
            ascii: args.ascii,
        },
    );
    Ok(())
}

fn cmd_unlock(cli: &Cli, args: &cli::UnlockArgs) -> Result<()> {
    let settings = cli.resolve_settings(None)?;
    let mut store =
        SqliteStore::open_existing(&settings.db_path, &settings.queue, settings.busy_timeout())?;

    if let Some(secs) = args.stuck_for {
        let age = config::seconds(secs, "--stuck-for")?;
        let released = store.sweep_stuck(age)?;
        if released.is_empty() {
            println!("No jobs locked for longer than {}s.", secs);
        } else {
            let ids: Vec<String> = released.iter().map(|id| id.job_id()).collect();
            println!(
                "{} {} job(s): {}",
                "Unlocked".success(),
                released.len().count(),
                ids.join(", ")
            );
        }
        return Ok(());
    }

    for id in &args.ids {
        if store.force_unlock(*id)? {
            println!("{} job {}", "Unlocked".success(), id.job_id());
        } else {
            println!("Job {} was not locked.", id.job_id());
        }
    }
    Ok(())
}
