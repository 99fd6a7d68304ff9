//! Logging for the CLI. Output goes through a non-blocking writer so a slow
//! terminal or disk never stalls the notification driver.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Full `EnvFilter` directives; replaces the level-derived filter when set.
pub const LOG_FILTER_ENV: &str = "TRANSFER_NOTIFY_LOG_FILTER";

/// Targets this workspace logs under.
const NOTIFY_TARGETS: &[&str] = &[
    "notify.cli",
    "notify.client",
    "notify.connection",
    "notify.driver",
    "notify.link",
    "notify.rest",
    "notify.router",
    "notify.snapshot",
    "notify.store",
];

/// Socket and HTTP internals; kept at info even at trace.
const TRANSPORT_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "hyper", "reqwest", "h2", "rustls"];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

impl LogConfig {
    fn filter(&self) -> EnvFilter {
        let directives = std::env::var(LOG_FILTER_ENV)
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| directives_for(self.level));
        EnvFilter::new(directives)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to install logger: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber once; later calls are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }
    let (writer, guard) = writer_for(config.file.as_deref())?;
    let verbose = config.level >= LogLevel::Debug;

    tracing_subscriber::registry()
        .with(config.filter())
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(config.file.is_none())
                .with_target(verbose)
                .with_thread_names(config.level == LogLevel::Trace),
        )
        .try_init()?;

    let _ = GUARD.set(guard);
    Ok(())
}

fn writer_for(file: Option<&Path>) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let Some(path) = file else {
        return Ok(tracing_appender::non_blocking(std::io::stderr()));
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| InitError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(tracing_appender::non_blocking(file))
}

/// Quiet levels apply everywhere. Debug and trace raise only the `notify.*`
/// targets; everything else stays at info.
fn directives_for(level: LogLevel) -> String {
    if level < LogLevel::Debug {
        return level.as_directive().to_owned();
    }
    let mut directives = vec!["info".to_owned()];
    directives.extend(
        NOTIFY_TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.as_directive())),
    );
    if level == LogLevel::Trace {
        directives.extend(TRANSPORT_TARGETS.iter().map(|target| format!("{target}=info")));
    }
    directives.join(",")
}
