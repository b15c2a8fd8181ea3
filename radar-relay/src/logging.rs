//! Log sinks
//!
//! Monitors log through `tracing`. Each monitor owns a [`Logger`], a dispatcher
//! whose only layer is a [`SinkLayer`] that formats events as
//! `LEVEL [category]: message` and routes them to one [`LogSink`] per severity.
//! The dispatcher is installed on the monitor's worker threads, so nothing is
//! registered process-wide.

use crate::error::{RelayError, RelayResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::dispatcher::{self, DefaultGuard};
use tracing::field::{Field, Visit};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    fn level_filter(&self) -> LevelFilter {
        match self {
            Severity::Debug => LevelFilter::TRACE,
            Severity::Info => LevelFilter::INFO,
            Severity::Warning => LevelFilter::WARN,
            Severity::Error | Severity::Fatal => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for formatted log records
pub trait LogSink: Send + Sync {
    fn write(&self, severity: Severity, category: &str, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(Severity, &str, &str) + Send + Sync,
{
    fn write(&self, severity: Severity, category: &str, message: &str) {
        self(severity, category, message)
    }
}

pub fn format_line(severity: Severity, category: &str, message: &str) -> String {
    format!("{} [{}]: {}", severity, category, message)
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&self, _severity: Severity, _category: &str, _message: &str) {}
}

/// Optional console copy of a file sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    None,
    Stdout,
    Stderr,
}

impl Echo {
    fn emit(&self, line: &str) {
        match self {
            Echo::None => {}
            Echo::Stdout => println!("{}", line),
            Echo::Stderr => eprintln!("{}", line),
        }
    }
}

/// Writes to the console only
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    echo: Echo,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self { echo: Echo::Stdout }
    }

    pub fn stderr() -> Self {
        Self { echo: Echo::Stderr }
    }
}

impl LogSink for ConsoleSink {
    fn write(&self, severity: Severity, category: &str, message: &str) {
        self.echo.emit(&format_line(severity, category, message));
    }
}

/// Appends lines to a file, optionally echoing them to the console
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
    echo: Echo,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>, echo: Echo) -> RelayResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RelayError::Logging(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            echo,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn write(&self, severity: Severity, category: &str, message: &str) {
        let line = format_line(severity, category, message);
        {
            let mut file = self.file.lock();
            // A failed log write has nowhere better to go.
            let _ = writeln!(file, "{}", line);
        }
        self.echo.emit(&line);
    }
}

/// One sink per severity
#[derive(Clone)]
pub struct LogSinks {
    pub debug: Arc<dyn LogSink>,
    pub info: Arc<dyn LogSink>,
    pub warning: Arc<dyn LogSink>,
    pub error: Arc<dyn LogSink>,
    pub fatal: Arc<dyn LogSink>,
}

impl LogSinks {
    /// The same sink for every severity
    pub fn uniform(sink: Arc<dyn LogSink>) -> Self {
        Self {
            debug: Arc::clone(&sink),
            info: Arc::clone(&sink),
            warning: Arc::clone(&sink),
            error: Arc::clone(&sink),
            fatal: sink,
        }
    }

    pub fn silent() -> Self {
        Self::uniform(Arc::new(NullSink))
    }

    /// Debug and info go to `info`; warning, error and fatal go to `error`
    pub fn split(info: Arc<dyn LogSink>, error: Arc<dyn LogSink>) -> Self {
        Self {
            debug: Arc::clone(&info),
            info,
            warning: Arc::clone(&error),
            error: Arc::clone(&error),
            fatal: error,
        }
    }

    pub fn sink(&self, severity: Severity) -> &Arc<dyn LogSink> {
        match severity {
            Severity::Debug => &self.debug,
            Severity::Info => &self.info,
            Severity::Warning => &self.warning,
            Severity::Error => &self.error,
            Severity::Fatal => &self.fatal,
        }
    }
}

/// `tracing` layer that feeds [`LogSinks`]
pub struct SinkLayer {
    sinks: LogSinks,
}

impl SinkLayer {
    pub fn new(sinks: LogSinks) -> Self {
        Self { sinks }
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut record = EventRecord::default();
        event.record(&mut record);
        if record.message.is_empty() {
            return;
        }

        let level = *event.metadata().level();
        let severity = if level == Level::ERROR {
            if record.fatal {
                Severity::Fatal
            } else {
                Severity::Error
            }
        } else if level == Level::WARN {
            Severity::Warning
        } else if level == Level::INFO {
            Severity::Info
        } else {
            Severity::Debug
        };

        let mut message = record.message;
        for field in &record.fields {
            message.push(' ');
            message.push_str(field);
        }
        self.sinks
            .sink(severity)
            .write(severity, event.metadata().target(), &message);
    }
}

#[derive(Default)]
struct EventRecord {
    message: String,
    fields: Vec<String>,
    fatal: bool,
}

impl Visit for EventRecord {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "fatal" {
            self.fatal = value;
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Log file settings for a monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Discard everything
    pub silent: bool,

    /// Lowest severity that is recorded
    pub level: Severity,

    /// Destination for debug and info records; `None` means stdout
    pub info_file: Option<PathBuf>,

    /// Destination for warning, error and fatal records; `None` means stderr
    pub error_file: Option<PathBuf>,

    /// Copy file output to stdout/stderr as well
    pub echo: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            silent: false,
            level: Severity::Info,
            info_file: Some(PathBuf::from("debug.log")),
            error_file: Some(PathBuf::from("error.log")),
            echo: false,
        }
    }
}

impl LogConfig {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// Console only, no files
    pub fn console() -> Self {
        Self {
            info_file: None,
            error_file: None,
            ..Self::default()
        }
    }

    pub fn with_files(mut self, info: impl Into<PathBuf>, error: impl Into<PathBuf>) -> Self {
        self.info_file = Some(info.into());
        self.error_file = Some(error.into());
        self
    }

    pub fn with_level(mut self, level: Severity) -> Self {
        self.level = level;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Open the configured sinks
    pub fn build_sinks(&self) -> RelayResult<LogSinks> {
        if self.silent {
            return Ok(LogSinks::silent());
        }

        let info: Arc<dyn LogSink> = match &self.info_file {
            Some(path) => Arc::new(FileSink::open(
                path,
                if self.echo { Echo::Stdout } else { Echo::None },
            )?),
            None => Arc::new(ConsoleSink::stdout()),
        };
        let error: Arc<dyn LogSink> = match &self.error_file {
            Some(path) => Arc::new(FileSink::open(
                path,
                if self.echo { Echo::Stderr } else { Echo::None },
            )?),
            None => Arc::new(ConsoleSink::stderr()),
        };

        Ok(LogSinks::split(info, error))
    }
}

/// A `tracing` dispatcher bound to a set of sinks
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
}

impl Logger {
    pub fn new(sinks: LogSinks, level: Severity) -> Self {
        let subscriber = tracing_subscriber::registry()
            .with(level.level_filter())
            .with(SinkLayer::new(sinks));
        Self {
            dispatch: Dispatch::new(subscriber),
        }
    }

    pub fn from_config(config: &LogConfig) -> RelayResult<Self> {
        Ok(Self::new(config.build_sinks()?, config.level))
    }

    pub fn silent() -> Self {
        Self::new(LogSinks::silent(), Severity::Fatal)
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Make this logger the current thread's dispatcher until the guard drops
    pub fn set_thread_default(&self) -> DefaultGuard {
        dispatcher::set_default(&self.dispatch)
    }

    /// Run `f` with this logger as the current dispatcher
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        dispatcher::with_default(&self.dispatch, f)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    type Records = Arc<Mutex<Vec<(Severity, String, String)>>>;

    fn recording() -> (LogSinks, Records) {
        let records: Records = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);
        let sinks = LogSinks::uniform(Arc::new(
            move |severity: Severity, category: &str, message: &str| {
                sink.lock()
                    .push((severity, category.to_string(), message.to_string()));
            },
        ));
        (sinks, records)
    }

    #[test]
    fn test_levels_are_routed() {
        let (sinks, records) = recording();
        let logger = Logger::new(sinks, Severity::Debug);

        logger.in_scope(|| {
            tracing::debug!(target: "sentinel", "probing");
            tracing::info!(target: "sentinel", "connected");
            tracing::warn!(target: "sentinel", "Restarting connection...");
            tracing::error!(target: "sentinel", "inventory: channel stopped");
            tracing::error!(target: "sentinel", fatal = true, "giving up");
        });

        let severities: Vec<_> = records.lock().iter().map(|r| r.0).collect();
        assert_eq!(
            severities,
            vec![
                Severity::Debug,
                Severity::Info,
                Severity::Warning,
                Severity::Error,
                Severity::Fatal
            ]
        );
        assert_eq!(records.lock()[2].1, "sentinel");
        assert_eq!(records.lock()[2].2, "Restarting connection...");
    }

    #[test]
    fn test_level_filter_and_fields() {
        let (sinks, records) = recording();
        let logger = Logger::new(sinks, Severity::Warning);

        logger.in_scope(|| {
            tracing::info!("dropped");
            tracing::warn!(inv_type = 7u32, "Ignoring unknown inventory type");
        });

        let records = records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].2, "Ignoring unknown inventory type inv_type=7");
    }

    #[test]
    fn test_empty_messages_are_skipped() {
        let (sinks, records) = recording();
        Logger::new(sinks, Severity::Debug).in_scope(|| {
            tracing::info!("");
            tracing::info!(peer = "x");
        });
        assert!(records.lock().is_empty());
    }

    #[test]
    fn test_file_sinks_split_by_severity() {
        let dir = tempdir().unwrap();
        let info_path = dir.path().join("debug.log");
        let error_path = dir.path().join("error.log");

        let config = LogConfig::default().with_files(&info_path, &error_path);
        let logger = Logger::from_config(&config).unwrap();
        logger.in_scope(|| {
            tracing::info!(target: "broadcaster", "Connection established");
            tracing::warn!(target: "broadcaster", "Couldn't start connection");
        });

        let info = std::fs::read_to_string(&info_path).unwrap();
        let error = std::fs::read_to_string(&error_path).unwrap();
        assert_eq!(info, "INFO [broadcaster]: Connection established\n");
        assert_eq!(error, "WARNING [broadcaster]: Couldn't start connection\n");
    }

    #[test]
    fn test_unwritable_file_is_a_logging_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing").join("debug.log");
        let result = FileSink::open(&missing, Echo::None);
        assert!(matches!(result, Err(RelayError::Logging(_))));
    }

    #[test]
    fn test_silent_config_discards() {
        let logger = Logger::from_config(&LogConfig::silent()).unwrap();
        logger.in_scope(|| tracing::error!("nobody hears this"));
        assert_eq!(format_line(Severity::Warning, "net", "hi"), "WARNING [net]: hi");
    }
}
