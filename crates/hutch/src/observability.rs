//! Logging setup of the command line. Everything the runtime reports goes
//! through `tracing`; this installs the subscriber that writes it out.
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Extra `env-filter` directives applied on top of the selected level
const LOG_DIRECTIVES_ENV: &str = "HUTCH_LOG";

#[cfg(debug_assertions)]
const DEFAULT_LEVEL: Level = Level::DEBUG;
#[cfg(not(debug_assertions))]
const DEFAULT_LEVEL: Level = Level::ERROR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => bail!("unknown log format {other:?}, expected text or json"),
        }
    }
}

#[derive(Debug, Default)]
pub struct ObservabilityConfig {
    pub log_debug_flag: bool,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub log_format: Option<String>,
}

impl From<&crate::Opts> for ObservabilityConfig {
    fn from(opts: &crate::Opts) -> Self {
        Self {
            log_debug_flag: opts.global.debug,
            log_level: opts.global.log_level.clone(),
            log_file: opts.global.log.clone(),
            log_format: opts.global.log_format.clone(),
        }
    }
}

impl ObservabilityConfig {
    /// An explicit level wins over `--debug`
    fn level(&self) -> Result<Level> {
        match self.log_level.as_deref() {
            Some(level) => {
                Level::from_str(level).with_context(|| format!("invalid log level {level:?}"))
            }
            None if self.log_debug_flag => Ok(Level::DEBUG),
            None => Ok(DEFAULT_LEVEL),
        }
    }

    fn format(&self) -> Result<LogFormat> {
        self.log_format
            .as_deref()
            .map_or(Ok(LogFormat::Text), LogFormat::from_str)
    }
}

/// Installs the global subscriber. Fails when one is already installed.
pub fn init<T>(config: T) -> Result<()>
where
    T: Into<ObservabilityConfig>,
{
    let config = config.into();
    let level = config.level()?;
    let format = config.format()?;

    let writer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path:?}"))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let output = tracing_subscriber::fmt::layer().with_writer(writer);
    let output: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => output
            .json()
            .flatten_event(true)
            .with_span_list(false)
            .boxed(),
        // the terminal user does not need timestamps
        LogFormat::Text if config.log_file.is_none() => output.without_time().boxed(),
        LogFormat::Text => output.boxed(),
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .with_env_var(LOG_DIRECTIVES_ENV)
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|err| anyhow!("failed to install the log subscriber: {err}"))
}
