//! Progress reporting, message log and cooperative cancellation.
//!
//! Long-running operations report nested work levels: each
//! [`ProgressCallback::start_work`] opens a level with a number of steps and
//! [`ProgressCallback::finish_work`] closes it. Percent is derived from the
//! finished steps of the first four levels, each level subdividing one step
//! of its parent.
//!
//! Messages are logged as keys plus arguments; translating keys into text is
//! left to the caller.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::types::{now_millis, Timestamp};

/// Builds a `Vec<String>` of message arguments from displayable values.
#[macro_export]
macro_rules! msg_args {
    ($($arg:expr),* $(,)?) => {
        vec![$($arg.to_string()),*]
    };
}

/// Severity of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// Informational.
    Info,
    /// Something unexpected that did not stop the operation.
    Warning,
    /// A failure.
    Error,
}

/// A logged message key with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// When the message was logged.
    pub timestamp: Timestamp,
    /// Severity.
    pub level: LogLevel,
    /// Message key.
    pub key: String,
    /// Message arguments.
    pub args: Vec<String>,
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            f.write_str(&self.key)
        } else {
            write!(f, "{} [{}]", self.key, self.args.join(", "))
        }
    }
}

/// Sink for progress, log messages and cancellation.
///
/// Implementations are shared between the worker and the thread that may
/// cancel it, so every method takes `&self`.
pub trait ProgressCallback: Send + Sync {
    /// Opens a nested work level with `steps_total` steps (at least 1).
    fn start_work(&self, steps_total: usize);

    /// Marks the current level complete and closes it.
    fn finish_work(&self);

    /// Changes the step count of the current level.
    fn set_steps_total(&self, steps_total: usize);

    /// Marks one more step of the current level finished.
    fn step_finished(&self);

    /// Marks the whole operation finished.
    fn set_finished(&self);

    /// Overrides the current percent value.
    fn set_percent(&self, percent: u32);

    /// Current percent value.
    fn percent(&self) -> u32;

    /// Sets the status message; it is also logged at info level.
    fn set_message(&self, key: &str, args: Vec<String>);

    /// Appends a message to the log.
    fn log(&self, level: LogLevel, key: &str, args: Vec<String>);

    /// Returns true once cancellation was requested.
    fn is_cancelled(&self) -> bool;

    /// Requests cancellation.
    fn cancel(&self);

    /// Logs at info level.
    fn log_info(&self, key: &str, args: Vec<String>) {
        self.log(LogLevel::Info, key, args);
    }

    /// Logs at warning level.
    fn log_warning(&self, key: &str, args: Vec<String>) {
        self.log(LogLevel::Warning, key, args);
    }

    /// Logs at error level.
    fn log_error(&self, key: &str, args: Vec<String>) {
        self.log(LogLevel::Error, key, args);
    }
}

/// Fails with [`CoreError::Cancelled`] once cancellation was requested.
///
/// # Errors
///
/// Returns `Cancelled` if `progress` is present and cancelled.
pub fn check_cancelled(progress: Option<&dyn ProgressCallback>) -> CoreResult<()> {
    match progress {
        Some(p) if p.is_cancelled() => Err(CoreError::Cancelled),
        _ => Ok(()),
    }
}

/// Configuration for [`DefaultProgress`].
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Maximum number of retained log messages; older ones are dropped.
    pub max_log_entries: usize,
    /// Number of work levels contributing to the percent value.
    pub percent_levels: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            max_log_entries: 10_000,
            percent_levels: 4,
        }
    }
}

impl ProgressConfig {
    /// Sets the log capacity.
    #[must_use]
    pub const fn max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct WorkLevel {
    total: usize,
    finished: usize,
}

#[derive(Debug, Default)]
struct ProgressState {
    message_key: Option<String>,
    message_args: Vec<String>,
    percent: u32,
    levels: Vec<WorkLevel>,
    finished: bool,
}

impl ProgressState {
    fn recalc(&mut self, percent_levels: usize) {
        let mut delta = 100.0_f64;
        let mut result = 0.0_f64;
        for level in self.levels.iter().take(percent_levels) {
            if level.total == 0 {
                break;
            }
            delta /= level.total as f64;
            result += level.finished as f64 * delta;
        }
        self.percent = result.round() as u32;
    }
}

#[derive(Debug, Default)]
struct MessageLog {
    entries: VecDeque<LogMessage>,
    infos: usize,
    warnings: usize,
    errors: usize,
}

/// Thread-safe in-memory [`ProgressCallback`].
///
/// Every log message is mirrored to `tracing` at the matching level.
pub struct DefaultProgress {
    config: ProgressConfig,
    state: Mutex<ProgressState>,
    log: Mutex<MessageLog>,
    cancelled: AtomicBool,
}

impl DefaultProgress {
    /// Creates a progress sink with default configuration.
    pub fn new() -> Self {
        Self::with_config(ProgressConfig::default())
    }

    /// Creates a progress sink with the given configuration.
    pub fn with_config(config: ProgressConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ProgressState::default()),
            log: Mutex::new(MessageLog::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Current status message key.
    pub fn message_key(&self) -> Option<String> {
        self.state.lock().message_key.clone()
    }

    /// Arguments of the current status message.
    pub fn message_args(&self) -> Vec<String> {
        self.state.lock().message_args.clone()
    }

    /// Step count of the current level; zero outside any level.
    pub fn steps_total(&self) -> usize {
        self.state.lock().levels.last().map_or(0, |l| l.total)
    }

    /// Finished steps of the current level; zero outside any level.
    pub fn steps_finished(&self) -> usize {
        self.state.lock().levels.last().map_or(0, |l| l.finished)
    }

    /// Depth of nested work levels.
    pub fn work_depth(&self) -> usize {
        self.state.lock().levels.len()
    }

    /// Returns true after [`ProgressCallback::set_finished`].
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Number of info messages logged, including dropped ones.
    pub fn info_count(&self) -> usize {
        self.log.lock().infos
    }

    /// Number of warnings logged, including dropped ones.
    pub fn warning_count(&self) -> usize {
        self.log.lock().warnings
    }

    /// Number of errors logged, including dropped ones.
    pub fn error_count(&self) -> usize {
        self.log.lock().errors
    }

    /// Number of retained messages.
    pub fn log_count(&self) -> usize {
        self.log.lock().entries.len()
    }

    /// Retained messages of the selected severities, oldest first.
    pub fn messages(&self, infos: bool, warnings: bool, errors: bool) -> Vec<LogMessage> {
        self.log
            .lock()
            .entries
            .iter()
            .filter(|m| match m.level {
                LogLevel::Info => infos,
                LogLevel::Warning => warnings,
                LogLevel::Error => errors,
            })
            .cloned()
            .collect()
    }

    /// Retained messages in `from..to`, clamped to the log length.
    pub fn messages_range(&self, from: usize, to: usize) -> Vec<LogMessage> {
        let log = self.log.lock();
        let to = to.min(log.entries.len());
        if to <= from {
            return Vec::new();
        }
        log.entries.range(from..to).cloned().collect()
    }

    /// Clears the cancel flag so the sink can be reused.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

impl Default for DefaultProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCallback for DefaultProgress {
    fn start_work(&self, steps_total: usize) {
        let mut state = self.state.lock();
        state.levels.push(WorkLevel {
            total: steps_total.max(1),
            finished: 0,
        });
        if state.levels.len() == 1 {
            state.percent = 0;
        }
    }

    fn finish_work(&self) {
        let mut state = self.state.lock();
        if let Some(level) = state.levels.last_mut() {
            level.finished = level.total;
            state.recalc(self.config.percent_levels);
            state.levels.pop();
        }
    }

    fn set_steps_total(&self, steps_total: usize) {
        let mut state = self.state.lock();
        if let Some(level) = state.levels.last_mut() {
            level.total = steps_total.max(1);
            level.finished = level.finished.min(level.total);
            state.recalc(self.config.percent_levels);
        }
    }

    fn step_finished(&self) {
        let mut state = self.state.lock();
        if let Some(level) = state.levels.last_mut() {
            level.finished = (level.finished + 1).min(level.total);
            state.recalc(self.config.percent_levels);
        }
    }

    fn set_finished(&self) {
        let mut state = self.state.lock();
        state.percent = 100;
        state.levels.clear();
        state.finished = true;
    }

    fn set_percent(&self, percent: u32) {
        self.state.lock().percent = percent;
    }

    fn percent(&self) -> u32 {
        self.state.lock().percent
    }

    fn set_message(&self, key: &str, args: Vec<String>) {
        {
            let mut state = self.state.lock();
            state.message_key = Some(key.to_string());
            state.message_args = args.clone();
        }
        self.log(LogLevel::Info, key, args);
    }

    fn log(&self, level: LogLevel, key: &str, args: Vec<String>) {
        match level {
            LogLevel::Info => tracing::info!(key, ?args, "progress"),
            LogLevel::Warning => tracing::warn!(key, ?args, "progress"),
            LogLevel::Error => tracing::error!(key, ?args, "progress"),
        }

        let mut log = self.log.lock();
        match level {
            LogLevel::Info => log.infos += 1,
            LogLevel::Warning => log.warnings += 1,
            LogLevel::Error => log.errors += 1,
        }
        log.entries.push_back(LogMessage {
            timestamp: now_millis(),
            level,
            key: key.to_string(),
            args,
        });
        while log.entries.len() > self.config.max_log_entries {
            log.entries.pop_front();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
