//! Logging setup shared by the CLI, the scheduler and worker processes.
//!
//! # Environment Variables
//!
//! - `RELAXD_LOG` - Log filter (overrides RUST_LOG)
//! - `RELAXD_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `RELAXD_LOG_FORMAT` - Output format: pretty, compact, json
//! - `RELAXD_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RELAXD_LOG_ROTATION` - Rotation of the log file: hourly, daily, never
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! Worker processes are started with the scheduler's `-v`/`-q` flags and
//! inherit its environment, so a whole pool logs the same way.
//!
//! ```no_run
//! use relaxd::logging::{LogConfig, init};
//!
//! init(LogConfig::for_scheduler().with_env_overrides());
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human-readable output
    Pretty,
    /// Single-line output
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Rotation of the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    /// Single append-only file
    #[default]
    Never,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "never" => Ok(Self::Never),
            _ => Err(format!(
                "Unknown log rotation: '{}'. Valid options: hourly, daily, never",
                s
            )),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration, passed to [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level, used when no filter is set
    pub level: Level,
    pub format: LogFormat,
    /// Extra log file (stderr is always written)
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Emit span close events with timing
    pub span_events: bool,
    /// Filter directive, overrides `level`
    pub filter: Option<String>,
    pub show_target: bool,
    /// ANSI colours on stderr
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            file_path: None,
            rotation: LogRotation::Never,
            span_events: false,
            filter: None,
            show_target: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for short-lived commands (`submit`, `status`, ...).
    pub fn for_cli() -> Self {
        Self::default().with_level(Level::WARN)
    }

    /// Preset for the scheduler and its workers.
    pub fn for_scheduler() -> Self {
        Self {
            show_target: true,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Apply `RELAXD_LOG*` environment variables.
    ///
    /// A filter already set from the CLI (`-v`, `-q`) is kept.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            self.filter = std::env::var("RELAXD_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .ok();
        }
        if self.filter.is_none()
            && let Ok(level) = std::env::var("RELAXD_LOG_LEVEL")
        {
            self.level = parse_level(&level).unwrap_or(self.level);
        }
        if let Ok(format) = std::env::var("RELAXD_LOG_FORMAT")
            && let Ok(format) = format.parse()
        {
            self.format = format;
        }
        if let Ok(path) = std::env::var("RELAXD_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }
        if let Ok(rotation) = std::env::var("RELAXD_LOG_ROTATION")
            && let Ok(rotation) = rotation.parse()
        {
            self.rotation = rotation;
        }
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string().to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }

    fn fmt_span(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Filter directive for a `-v` count: 1 = debug, 2+ = trace.
pub fn verbosity_filter(verbose: u8) -> Option<String> {
    match verbose {
        0 => None,
        1 => Some("relaxd=debug,info".to_string()),
        _ => Some("relaxd=trace,debug".to_string()),
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_span_events(config.fmt_span())
        .with_target(config.show_target)
        .with_ansi(ansi)
        .with_writer(writer);
    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
    }
}

fn file_appender(path: &Path, rotation: LogRotation) -> RollingFileAppender {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("relaxd.log");
    RollingFileAppender::new(rotation.into(), dir, file_name)
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config: LogConfig) {
    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(&config, std::io::stderr, config.ansi)];
    if let Some(path) = &config.file_path {
        layers.push(fmt_layer(&config, file_appender(path, config.rotation), false));
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(config.build_filter())
        .try_init();
}
