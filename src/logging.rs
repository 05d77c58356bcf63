//! Logging helpers on top of [tracing].
//!
//! [FilterLogger] gates messages per component before they are emitted,
//! and [LogConfigurator] owns a set of output sinks (console, files,
//! in-memory buffers), each a `tracing-subscriber` fmt layer behind a
//! reload handle. Sinks can be written synchronously or through
//! `tracing-appender`'s non-blocking writer. Records from the [log]
//! facade are forwarded with `tracing-log` once the configurator is
//! installed.
use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{
    Dispatch, Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_log::NormalizeEvent;
use tracing_subscriber::{
    Layer, Registry,
    fmt::{
        FmtContext, FormatEvent, FormatFields, MakeWriter, format::Writer, writer::BoxMakeWriter,
    },
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    reload,
};

/// Severity levels, numbered like loguru's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verbosity {
    Trace = 5,
    Debug = 10,
    Info = 20,
    Success = 25,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

impl Verbosity {
    pub const ALL: [Verbosity; 7] = [
        Verbosity::Trace,
        Verbosity::Debug,
        Verbosity::Info,
        Verbosity::Success,
        Verbosity::Warning,
        Verbosity::Error,
        Verbosity::Critical,
    ];

    pub fn value(self) -> u32 {
        self as u32
    }

    pub fn from_value(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.value() == value)
    }

    pub fn name(self) -> &'static str {
        match self {
            Verbosity::Trace => "TRACE",
            Verbosity::Debug => "DEBUG",
            Verbosity::Info => "INFO",
            Verbosity::Success => "SUCCESS",
            Verbosity::Warning => "WARNING",
            Verbosity::Error => "ERROR",
            Verbosity::Critical => "CRITICAL",
        }
    }

    /// Case-insensitive lookup that also accepts `WARN` and numeric values.
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        if upper == "WARN" {
            return Some(Verbosity::Warning);
        }
        if let Ok(n) = upper.parse::<u32>() {
            return Self::from_value(n);
        }
        Self::exact_name(&upper)
    }

    /// Only the upper-case names themselves, as written by [Verbosity::name].
    pub fn exact_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }

    /// Like [Verbosity::from_name], falling back to `Info` for unknown names.
    pub fn parse_lenient(name: &str) -> Self {
        Self::from_name(name).unwrap_or(Verbosity::Info)
    }

    /// The `tracing` level events of this verbosity are emitted at.
    ///
    /// Success and Critical share a level with Info and Error; the exact
    /// verbosity travels in the event's `verbosity` field.
    pub fn level(self) -> Level {
        match self {
            Verbosity::Trace => Level::TRACE,
            Verbosity::Debug => Level::DEBUG,
            Verbosity::Info | Verbosity::Success => Level::INFO,
            Verbosity::Warning => Level::WARN,
            Verbosity::Error | Verbosity::Critical => Level::ERROR,
        }
    }

    pub fn from_level(level: Level) -> Self {
        match level {
            Level::TRACE => Verbosity::Trace,
            Level::DEBUG => Verbosity::Debug,
            Level::INFO => Verbosity::Info,
            Level::WARN => Verbosity::Warning,
            _ => Verbosity::Error,
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Verbosity {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| crate::Error::general(format!("unknown log level {s:?}")))
    }
}

/// Per-component message gate.
///
/// Messages below the threshold are dropped before they reach any
/// subscriber. Trace and debug messages additionally require `debug` to be
/// set. Events carry the classname and the numeric verbosity as fields.
#[derive(Debug, Clone)]
pub struct FilterLogger {
    classname: String,
    threshold: u32,
    debug: bool,
    dispatch: Option<Dispatch>,
}

impl FilterLogger {
    pub fn new(classname: impl Into<String>, verbose: Verbosity, debug: bool) -> Self {
        Self {
            classname: classname.into(),
            threshold: verbose.value(),
            debug,
            dispatch: None,
        }
    }

    /// Emit to `dispatch` instead of the current default subscriber.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn classname(&self) -> &str {
        &self.classname
    }

    pub fn set_classname(&mut self, classname: impl Into<String>) {
        self.classname = classname.into();
    }

    /// Raw numeric threshold, for levels between the named ones.
    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold;
    }

    pub fn set_filter_level(&mut self, verbose: Option<Verbosity>, debug: Option<bool>) {
        if let Some(v) = verbose {
            self.threshold = v.value();
        }
        if let Some(d) = debug {
            self.debug = d;
        }
    }

    pub fn enabled(&self, verbosity: Verbosity) -> bool {
        if matches!(verbosity, Verbosity::Trace | Verbosity::Debug) && !self.debug {
            return false;
        }
        self.threshold <= verbosity.value()
    }

    fn event(&self, verbosity: Verbosity, message: &dyn fmt::Display) {
        let classname = self.classname.as_str();
        let value = verbosity.value();
        match verbosity.level() {
            Level::TRACE => tracing::trace!(verbosity = value, classname, "{message}"),
            Level::DEBUG => tracing::debug!(verbosity = value, classname, "{message}"),
            Level::WARN => tracing::warn!(verbosity = value, classname, "{message}"),
            Level::ERROR => tracing::error!(verbosity = value, classname, "{message}"),
            _ => tracing::info!(verbosity = value, classname, "{message}"),
        }
    }

    fn emit(&self, verbosity: Verbosity, message: &dyn fmt::Display) {
        match &self.dispatch {
            Some(dispatch) => {
                tracing::dispatcher::with_default(dispatch, || self.event(verbosity, message))
            }
            None => self.event(verbosity, message),
        }
    }

    fn gated(&self, verbosity: Verbosity, message: impl fmt::Display) {
        if self.enabled(verbosity) {
            self.emit(verbosity, &message);
        }
    }

    pub fn trace(&self, message: impl fmt::Display) {
        self.gated(Verbosity::Trace, message)
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.gated(Verbosity::Debug, message)
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.gated(Verbosity::Info, message)
    }

    pub fn success(&self, message: impl fmt::Display) {
        self.gated(Verbosity::Success, message)
    }

    pub fn warning(&self, message: impl fmt::Display) {
        self.gated(Verbosity::Warning, message)
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.gated(Verbosity::Error, message)
    }

    pub fn critical(&self, message: impl fmt::Display) {
        self.gated(Verbosity::Critical, message)
    }

    /// Log by exact level name, e.g. `"SUCCESS"`. Unknown names are
    /// reported and treated as level 0, so the message only passes a zero
    /// threshold.
    pub fn log(&self, level: &str, message: impl fmt::Display) {
        match Verbosity::exact_name(level) {
            Some(v) => {
                if self.threshold <= v.value() {
                    self.emit(v, &message);
                }
            }
            None => {
                self.warning(format_args!("Log level {level} not found. Using 0 instead."));
                if self.threshold == 0 {
                    self.emit(Verbosity::Info, &message);
                }
            }
        }
    }
}

/// Line layout of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `time | LEVEL | classname | message`
    Standard,
    /// Standard fields plus module, file, line and thread.
    Detailed,
    /// One JSON object per line.
    Json,
}

pub type SharedBuffer = Arc<Mutex<Vec<u8>>>;

#[derive(Debug, Clone)]
pub enum SinkTarget {
    Stdout,
    Stderr,
    /// Appended to; created if missing.
    File(PathBuf),
    Buffer(SharedBuffer),
}

impl SinkTarget {
    fn same_as(&self, other: &SinkTarget) -> bool {
        match (self, other) {
            (SinkTarget::Stdout, SinkTarget::Stdout) | (SinkTarget::Stderr, SinkTarget::Stderr) => {
                true
            }
            (SinkTarget::File(a), SinkTarget::File(b)) => a == b,
            (SinkTarget::Buffer(a), SinkTarget::Buffer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// A writer for this target. Queued writers hand lines to a worker
    /// thread, which drains when the returned guard is dropped.
    fn make_writer(&self, queued: bool) -> io::Result<(BoxMakeWriter, Option<WorkerGuard>)> {
        if queued {
            let builder = NonBlockingBuilder::default().lossy(false);
            let (writer, guard) = match self {
                SinkTarget::Stdout => builder.finish(io::stdout()),
                SinkTarget::Stderr => builder.finish(io::stderr()),
                SinkTarget::File(path) => builder.finish(open_append(path)?),
                SinkTarget::Buffer(b) => builder.finish(BufferWriter(b.clone())),
            };
            return Ok((BoxMakeWriter::new(writer), Some(guard)));
        }
        let writer = match self {
            SinkTarget::Stdout => BoxMakeWriter::new(io::stdout),
            SinkTarget::Stderr => BoxMakeWriter::new(io::stderr),
            SinkTarget::File(path) => BoxMakeWriter::new(Mutex::new(open_append(path)?)),
            SinkTarget::Buffer(b) => BoxMakeWriter::new(BufferWriter(b.clone())),
        };
        Ok((writer, None))
    }
}

impl fmt::Display for SinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkTarget::Stdout => f.write_str("<stdout>"),
            SinkTarget::Stderr => f.write_str("<stderr>"),
            SinkTarget::File(p) => write!(f, "{}", p.display()),
            SinkTarget::Buffer(_) => f.write_str("<buffer>"),
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Appends to a [SharedBuffer].
#[derive(Clone)]
struct BufferWriter(SharedBuffer);

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Fields of an event, whether emitted by a [FilterLogger] or forwarded
/// from the `log` facade.
#[derive(Default)]
struct EventFields {
    message: String,
    verbosity: Option<u32>,
    classname: Option<String>,
}

impl Visit for EventFields {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "verbosity" {
            self.verbosity = u32::try_from(value).ok();
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_owned(),
            "classname" => self.classname = Some(value.to_owned()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

/// Numeric verbosity of `event`, from its `verbosity` field or its level.
fn event_verbosity(event: &Event<'_>) -> u32 {
    let mut fields = EventFields::default();
    event.record(&mut fields);
    fields
        .verbosity
        .unwrap_or_else(|| Verbosity::from_level(*event.metadata().level()).value())
}

/// Owned, rendered-ready copy of an event.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub verbosity: Verbosity,
    pub classname: String,
    pub message: String,
    pub module: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub thread: String,
}

impl LogEntry {
    pub fn from_event(event: &Event<'_>) -> Self {
        let mut fields = EventFields::default();
        event.record(&mut fields);
        let normalized = event.normalized_metadata();
        let metadata = normalized.as_ref().unwrap_or_else(|| event.metadata());
        let verbosity = fields
            .verbosity
            .and_then(Verbosity::from_value)
            .unwrap_or_else(|| Verbosity::from_level(*metadata.level()));
        let current = thread::current();
        Self {
            time: Utc::now(),
            verbosity,
            classname: fields
                .classname
                .unwrap_or_else(|| metadata.target().to_owned()),
            message: fields.message,
            module: metadata.module_path().map(str::to_owned),
            file: metadata.file().map(str::to_owned),
            line: metadata.line(),
            thread: current
                .name()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{:?}", current.id())),
        }
    }

    pub fn render(&self, format: LogFormat) -> String {
        let time = self.time.format("%Y-%m-%d %H:%M:%S%.3f");
        let level = self.verbosity.name();
        match format {
            LogFormat::Standard => {
                format!("{time} | {level:<8} | {} | {}", self.classname, self.message)
            }
            LogFormat::Detailed => format!(
                "{time} | {level:<8} | {} | M_{}:class_{}:file_{}:line_{} | th_{}",
                self.message,
                self.module.as_deref().unwrap_or("?"),
                self.classname,
                self.file.as_deref().unwrap_or("?"),
                self.line.map_or_else(|| "?".to_owned(), |l| l.to_string()),
                self.thread,
            ),
            LogFormat::Json => serde_json::json!({
                "time": self.time.to_rfc3339(),
                "level": level,
                "verbosity": self.verbosity.value(),
                "classname": self.classname,
                "message": self.message,
                "module": self.module,
                "file": self.file,
                "line": self.line,
                "thread": self.thread,
            })
            .to_string(),
        }
    }
}

/// Event formatter of one sink.
struct LineFormat(LogFormat);

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        use std::fmt::Write as _;
        writeln!(writer, "{}", LogEntry::from_event(event).render(self.0))
    }
}

pub type SinkId = usize;

#[derive(Debug, Clone)]
pub struct SinkInfo {
    pub id: SinkId,
    pub target: SinkTarget,
    pub level: Verbosity,
    pub format: LogFormat,
}

/// A fmt layer that only sees events at or above the sink's verbosity.
struct SinkLayer {
    info: SinkInfo,
    inner: Box<dyn Layer<Registry> + Send + Sync>,
    _guard: Option<WorkerGuard>,
}

impl SinkLayer {
    fn open(info: SinkInfo, queued: bool) -> io::Result<Self> {
        let (writer, guard) = info.target.make_writer(queued)?;
        let inner = tracing_subscriber::fmt::layer::<Registry>()
            .event_format(LineFormat(info.format))
            .with_writer(writer)
            .boxed();
        Ok(Self {
            info,
            inner,
            _guard: guard,
        })
    }
}

impl Layer<Registry> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, Registry>) {
        if event_verbosity(event) >= self.info.level.value() {
            self.inner.on_event(event, ctx);
        }
    }
}

type Sinks = Vec<SinkLayer>;

/// Configuration of a [LogConfigurator].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level of the console and file sinks.
    pub level: Verbosity,
    pub console: bool,
    /// Extra stderr sink for errors, with detailed lines.
    pub console_error: bool,
    pub file: Option<PathBuf>,
    pub json_file: Option<PathBuf>,
    /// Write sinks from background threads.
    pub queued: bool,
    /// Threshold of the configurator's own messages.
    pub verbose: Verbosity,
    pub debug: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Verbosity::Info,
            console: true,
            console_error: false,
            file: None,
            json_file: None,
            queued: false,
            verbose: Verbosity::Trace,
            debug: false,
        }
    }
}

/// Owns the log sinks of a program.
pub struct LogConfigurator {
    dispatch: Dispatch,
    handle: reload::Handle<Sinks, Registry>,
    queued: bool,
    next_id: SinkId,
    console_sink: Option<SinkId>,
    console_error_sink: Option<SinkId>,
    file_sink: Option<SinkId>,
    json_file_sink: Option<SinkId>,
    logger: FilterLogger,
}

impl LogConfigurator {
    pub fn new(config: LogConfig) -> crate::Result<Self> {
        let (layer, handle) = reload::Layer::new(Sinks::new());
        let dispatch = Dispatch::new(tracing_subscriber::registry().with(layer));
        let logger = FilterLogger::new("LogConfigurator", config.verbose, config.debug)
            .with_dispatch(dispatch.clone());
        let mut this = Self {
            dispatch,
            handle,
            queued: config.queued,
            next_id: 0,
            console_sink: None,
            console_error_sink: None,
            file_sink: None,
            json_file_sink: None,
            logger,
        };
        this.set_console_logger(config.level, config.console, false)?;
        this.set_console_error_logger(config.console_error)?;
        if let Some(path) = &config.file {
            this.set_file_logger(config.level, path, true)?;
        }
        if let Some(path) = &config.json_file {
            this.set_json_file_logger(config.level, path, true)?;
        }
        this.logger.debug(format_args!("queued: {}", config.queued));
        this.logger.info("Log configurator initialized.");
        Ok(this)
    }

    /// The subscriber writing to these sinks.
    pub fn dispatcher(&self) -> Dispatch {
        self.dispatch.clone()
    }

    /// Register the sinks as the process-wide subscriber and forward `log`
    /// records to them.
    ///
    /// Fails if another subscriber or logger was installed first.
    pub fn install(&self) -> crate::Result<()> {
        tracing::dispatcher::set_global_default(self.dispatch.clone())
            .map_err(crate::Error::wrap)?;
        tracing_log::LogTracer::init().map_err(crate::Error::wrap)?;
        Ok(())
    }

    /// Threshold of the configurator's own messages.
    pub fn set_log_level(&mut self, verbose: Verbosity, debug: bool) {
        self.logger.set_filter_level(Some(verbose), Some(debug));
    }

    /// A [FilterLogger] writing to these sinks. Unset options take the
    /// configurator's own settings.
    pub fn filter_logger(
        &self,
        classname: impl Into<String>,
        verbose: Option<Verbosity>,
        debug: Option<bool>,
    ) -> FilterLogger {
        let mut logger = self.logger.clone();
        logger.set_classname(classname);
        logger.set_filter_level(verbose, debug);
        logger
    }

    pub fn set_console_logger(
        &mut self,
        level: Verbosity,
        active: bool,
        details: bool,
    ) -> crate::Result<()> {
        if let Some(id) = self.console_sink.take() {
            self.remove_sink(id);
        }
        if active {
            let format = if level <= Verbosity::Debug || details {
                LogFormat::Detailed
            } else {
                LogFormat::Standard
            };
            self.console_sink = Some(self.add_sink(SinkTarget::Stdout, level, format)?);
        }
        Ok(())
    }

    pub fn set_console_error_logger(&mut self, active: bool) -> crate::Result<()> {
        if let Some(id) = self.console_error_sink.take() {
            self.remove_sink(id);
        }
        if active {
            self.console_error_sink =
                Some(self.add_sink(SinkTarget::Stderr, Verbosity::Error, LogFormat::Detailed)?);
        }
        Ok(())
    }

    pub fn set_file_logger(
        &mut self,
        level: Verbosity,
        path: impl Into<PathBuf>,
        active: bool,
    ) -> crate::Result<()> {
        if let Some(id) = self.file_sink.take() {
            self.remove_sink(id);
        }
        if active {
            let format = if level <= Verbosity::Debug {
                LogFormat::Detailed
            } else {
                LogFormat::Standard
            };
            self.file_sink = Some(self.add_sink(SinkTarget::File(path.into()), level, format)?);
        }
        Ok(())
    }

    pub fn set_json_file_logger(
        &mut self,
        level: Verbosity,
        path: impl Into<PathBuf>,
        active: bool,
    ) -> crate::Result<()> {
        if let Some(id) = self.json_file_sink.take() {
            self.remove_sink(id);
        }
        if active {
            self.json_file_sink =
                Some(self.add_sink(SinkTarget::File(path.into()), level, LogFormat::Json)?);
        }
        Ok(())
    }

    pub fn add_sink(
        &mut self,
        target: SinkTarget,
        level: Verbosity,
        format: LogFormat,
    ) -> crate::Result<SinkId> {
        if self.sinks().iter().any(|s| s.target.same_as(&target)) {
            self.logger
                .warning(format_args!("Sink {target} already in use and duplicated."));
        }
        let id = self.next_id;
        let description = target.to_string();
        let info = SinkInfo {
            id,
            target,
            level,
            format,
        };
        let sink = SinkLayer::open(info, self.queued)?;
        self.handle
            .modify(|sinks| sinks.push(sink))
            .map_err(crate::Error::wrap)?;
        self.next_id += 1;
        self.logger.info(format_args!(
            "Added sink id {id}, sink: {description}, level: {level}"
        ));
        Ok(id)
    }

    /// Returns `false` if no sink has this id.
    ///
    /// A queued sink is dropped after it is detached, which writes out
    /// every record already handed to it.
    pub fn remove_sink(&self, id: SinkId) -> bool {
        let mut removed = None;
        let detached = self.handle.modify(|sinks| {
            if let Some(i) = sinks.iter().position(|s| s.info.id == id) {
                removed = Some(sinks.remove(i));
            }
        });
        match (detached, removed) {
            (Ok(()), Some(sink)) => {
                let SinkInfo { target, level, .. } = sink.info.clone();
                drop(sink);
                self.logger.info(format_args!(
                    "Removing sink id {id}, sink: {target}, level: {level}"
                ));
                true
            }
            (Err(e), _) => {
                self.logger.error(format_args!("Sink id {id} not removed: {e}"));
                false
            }
            (Ok(()), None) => {
                self.logger.error(format_args!("Sink id {id} not found."));
                false
            }
        }
    }

    pub fn sinks(&self) -> Vec<SinkInfo> {
        self.handle
            .with_current(|sinks| sinks.iter().map(|s| s.info.clone()).collect())
            .unwrap_or_default()
    }

    /// Replace every sink with a fresh one of the same id, level and format.
    /// Files are reopened and queued sinks are drained.
    fn reopen(&self) -> crate::Result<()> {
        let infos = self.sinks();
        let fresh = infos
            .into_iter()
            .map(|info| SinkLayer::open(info, self.queued))
            .collect::<io::Result<Sinks>>()?;
        let mut old = Sinks::new();
        self.handle
            .modify(|sinks| old = std::mem::replace(sinks, fresh))
            .map_err(crate::Error::wrap)?;
        drop(old);
        Ok(())
    }

    /// Reopen every sink, keeping ids, levels and formats.
    pub fn reinitialize(&self) -> crate::Result<()> {
        self.logger.info("Reinitializing logger configuration.");
        self.reopen()?;
        self.logger.info("Logger reinitialized.");
        Ok(())
    }

    pub fn write_log(&self, level: &str, message: impl fmt::Display) {
        self.logger.log(level, message);
    }

    /// Wait until queued records are written.
    pub fn flush(&self) {
        if !self.queued {
            return;
        }
        if let Err(e) = self.reopen() {
            eprintln!("log sinks could not be flushed: {e}");
        }
    }

    /// Detach every sink, draining queued records first.
    pub fn shutdown(&mut self) {
        let mut old = Sinks::new();
        if self.handle.modify(|sinks| old = std::mem::take(sinks)).is_ok() {
            drop(old);
        }
        self.console_sink = None;
        self.console_error_sink = None;
        self.file_sink = None;
        self.json_file_sink = None;
    }
}

impl Drop for LogConfigurator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> LogConfig {
        LogConfig {
            console: false,
            ..Default::default()
        }
    }

    fn contents(buffer: &SharedBuffer) -> String {
        String::from_utf8(lock(buffer).clone()).unwrap()
    }

    #[test]
    fn verbosity_names() {
        assert_eq!(Verbosity::parse_lenient("warning"), Verbosity::Warning);
        assert_eq!(Verbosity::parse_lenient("nonsense"), Verbosity::Info);
        assert_eq!("CRITICAL".parse::<Verbosity>().unwrap().value(), 50);
        assert!("loud".parse::<Verbosity>().is_err());
        assert_eq!(Verbosity::from_name("25"), Some(Verbosity::Success));
        assert_eq!(Verbosity::from_name("26"), None);
        assert_eq!(Verbosity::exact_name("SUCCESS"), Some(Verbosity::Success));
        assert_eq!(Verbosity::exact_name("info"), None);
        assert_eq!(Verbosity::exact_name("WARN"), None);
        assert_eq!(Verbosity::Success.level(), Level::INFO);
        assert_eq!(Verbosity::Critical.level(), Level::ERROR);
    }

    #[test]
    fn filter_logger_gates_debug_and_threshold() {
        let mut l = FilterLogger::new("Reader", Verbosity::Info, false);
        assert!(!l.enabled(Verbosity::Debug));
        assert!(l.enabled(Verbosity::Info));
        l.set_filter_level(Some(Verbosity::Trace), None);
        assert!(!l.enabled(Verbosity::Trace));
        l.set_filter_level(None, Some(true));
        assert!(l.enabled(Verbosity::Trace));
        l.set_threshold(35);
        assert!(!l.enabled(Verbosity::Warning));
        assert!(l.enabled(Verbosity::Error));
    }

    #[test]
    fn sinks_filter_by_level_and_format() {
        let mut config = LogConfigurator::new(quiet()).unwrap();
        let std_buf = SharedBuffer::default();
        let json_buf = SharedBuffer::default();
        config
            .add_sink(SinkTarget::Buffer(std_buf.clone()), Verbosity::Warning, LogFormat::Standard)
            .unwrap();
        config
            .add_sink(SinkTarget::Buffer(json_buf.clone()), Verbosity::Info, LogFormat::Json)
            .unwrap();

        let logger = config.filter_logger("Writer", Some(Verbosity::Info), Some(false));
        logger.info("opened");
        logger.error("disk full");
        logger.debug("hidden");

        let text = contents(&std_buf);
        assert!(!text.contains("opened"));
        assert!(text.contains("| ERROR    | Writer | disk full"), "{text}");

        let lines: Vec<serde_json::Value> = contents(&json_buf)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .filter(|v: &serde_json::Value| v["classname"] == "Writer")
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["level"], "INFO");
        assert_eq!(lines[1]["message"], "disk full");
        assert_eq!(lines[1]["verbosity"], 40);
    }

    #[test]
    fn success_and_critical_keep_their_levels() {
        let mut config = LogConfigurator::new(quiet()).unwrap();
        let success_buf = SharedBuffer::default();
        let critical_buf = SharedBuffer::default();
        config
            .add_sink(
                SinkTarget::Buffer(success_buf.clone()),
                Verbosity::Success,
                LogFormat::Standard,
            )
            .unwrap();
        config
            .add_sink(
                SinkTarget::Buffer(critical_buf.clone()),
                Verbosity::Critical,
                LogFormat::Standard,
            )
            .unwrap();

        let logger = config.filter_logger("Pipeline", None, None);
        logger.info("plain-info");
        logger.success("done-success");
        logger.error("plain-error");
        logger.critical("really-critical");

        let success = contents(&success_buf);
        assert!(!success.contains("plain-info"), "{success}");
        assert!(success.contains("| SUCCESS  | Pipeline | done-success"), "{success}");
        assert!(success.contains("| ERROR    | Pipeline | plain-error"), "{success}");
        assert!(success.contains("| CRITICAL | Pipeline | really-critical"), "{success}");

        let critical = contents(&critical_buf);
        assert_eq!(critical.lines().count(), 1, "{critical}");
        assert!(critical.contains("| CRITICAL | Pipeline | really-critical"), "{critical}");
    }

    #[test]
    fn remove_and_list_sinks() {
        let mut config = LogConfigurator::new(quiet()).unwrap();
        assert!(config.sinks().is_empty());
        let buf = SharedBuffer::default();
        let id = config
            .add_sink(SinkTarget::Buffer(buf.clone()), Verbosity::Trace, LogFormat::Standard)
            .unwrap();
        config.set_console_error_logger(true).unwrap();
        assert_eq!(config.sinks().len(), 2);
        assert!(config.remove_sink(id));
        assert!(!config.remove_sink(id));
        assert_eq!(config.sinks().len(), 1);
        assert!(matches!(config.sinks()[0].target, SinkTarget::Stderr));
    }

    #[test]
    fn queued_records_are_written_by_background_thread() {
        let mut config = LogConfigurator::new(LogConfig {
            queued: true,
            ..quiet()
        })
        .unwrap();
        let buf = SharedBuffer::default();
        config
            .add_sink(SinkTarget::Buffer(buf.clone()), Verbosity::Info, LogFormat::Standard)
            .unwrap();
        let logger = config.filter_logger("Worker", None, None);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let logger = logger.clone();
                thread::spawn(move || logger.info(format_args!("message {i}")))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        config.shutdown();
        let text = contents(&buf);
        for i in 0..4 {
            assert!(text.contains(&format!("message {i}")), "{text}");
        }
        assert!(config.sinks().is_empty());
    }

    #[test]
    fn removing_a_queued_sink_keeps_pending_records() {
        let mut config = LogConfigurator::new(LogConfig {
            queued: true,
            ..quiet()
        })
        .unwrap();
        let buf = SharedBuffer::default();
        let id = config
            .add_sink(SinkTarget::Buffer(buf.clone()), Verbosity::Info, LogFormat::Standard)
            .unwrap();
        let logger = config.filter_logger("Burst", None, None);
        for i in 0..2000 {
            logger.info(format_args!("record {i}"));
        }
        assert!(config.remove_sink(id));
        let written = contents(&buf)
            .lines()
            .filter(|l| l.contains("| Burst | record "))
            .count();
        assert_eq!(written, 2000);
    }

    #[test]
    fn replacing_a_queued_file_sink_keeps_pending_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queued.log");
        let mut config = LogConfigurator::new(LogConfig {
            queued: true,
            ..quiet()
        })
        .unwrap();
        config.set_file_logger(Verbosity::Info, &path, true).unwrap();
        for i in 0..500 {
            config.write_log("INFO", format_args!("line {i}"));
        }
        config.set_file_logger(Verbosity::Info, &path, false).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let written = text
            .lines()
            .filter(|l| l.contains("| LogConfigurator | line "))
            .count();
        assert_eq!(written, 500);
    }

    #[test]
    fn unknown_level_name_is_reported() {
        let mut config = LogConfigurator::new(quiet()).unwrap();
        let buf = SharedBuffer::default();
        config
            .add_sink(SinkTarget::Buffer(buf.clone()), Verbosity::Trace, LogFormat::Standard)
            .unwrap();
        config.write_log("LOUD", "dropped");
        let text = contents(&buf);
        assert!(text.contains("Log level LOUD not found"));
        assert!(!text.contains("dropped"));

        config.write_log("info", "lowercase");
        let text = contents(&buf);
        assert!(text.contains("Log level info not found"));
        assert!(!text.contains("| lowercase"));

        config.write_log("SUCCESS", "named");
        assert!(contents(&buf).contains("| SUCCESS  | LogConfigurator | named"));

        let mut permissive = config.filter_logger("Any", None, None);
        permissive.set_threshold(0);
        permissive.log("LOUD", "kept");
        assert!(contents(&buf).contains("kept"));
    }

    #[test]
    fn file_sink_appends_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.log");
        let mut config = LogConfigurator::new(quiet()).unwrap();
        config.set_file_logger(Verbosity::Info, &path, true).unwrap();
        config.write_log("INFO", "first");
        config.reinitialize().unwrap();
        config.write_log("WARNING", "second");
        config.flush();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("first"));
        assert!(text.contains("| WARNING  | LogConfigurator | second"), "{text}");
    }

    #[test]
    fn log_facade_records_reach_sinks() {
        let mut config = LogConfigurator::new(quiet()).unwrap();
        let buf = SharedBuffer::default();
        config
            .add_sink(SinkTarget::Buffer(buf.clone()), Verbosity::Info, LogFormat::Standard)
            .unwrap();
        let record = log::Record::builder()
            .args(format_args!("from log"))
            .level(log::Level::Warn)
            .target("imutils::reader")
            .build();
        tracing::dispatcher::with_default(&config.dispatcher(), || {
            tracing_log::format_trace(&record).unwrap()
        });
        assert!(
            contents(&buf).contains("| WARNING  | imutils::reader | from log"),
            "{}",
            contents(&buf)
        );
    }
}
