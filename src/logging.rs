// src/logging.rs
//
// Log sink for the bridge: every line goes to stderr and, once file logging is
// initialised, is appended to `<log-dir>/mqtt_serial_bridge.log`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Timestamped logging macro.
///
/// `tlog!("...")` logs at INFO; `tlog!(warn: "...")` and `tlog!(error: "...")`
/// select the other levels.
macro_rules! tlog {
    (warn: $($arg:tt)*) => {
        $crate::logging::write_line($crate::logging::Level::Warn, format_args!($($arg)*))
    };
    (error: $($arg:tt)*) => {
        $crate::logging::write_line($crate::logging::Level::Error, format_args!($($arg)*))
    };
    ($($arg:tt)*) => {
        $crate::logging::write_line($crate::logging::Level::Info, format_args!($($arg)*))
    };
}

/// Name of the append-only log file inside the log directory.
pub const LOG_FILE_NAME: &str = "mqtt_serial_bridge.log";

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "INFO",
            Level::Warn => "WARNING",
            Level::Error => "ERROR",
        })
    }
}

/// Format one log line: `YYYY-MM-DD HH:MM:SS - LEVEL - message`.
pub fn format_line(level: Level, args: fmt::Arguments<'_>) -> String {
    format!(
        "{} - {} - {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        level,
        args
    )
}

#[doc(hidden)]
pub fn write_line(level: Level, args: fmt::Arguments<'_>) {
    use std::io::Write as _;
    let line = format_line(level, args);
    eprintln!("{}", line);
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(ref mut f) = *guard {
            let _ = writeln!(f, "{}", line);
        }
    }
}

/// Initialise file logging in the given directory, creating it if needed.
/// The log file is opened in append mode so restarts keep earlier history.
pub fn init_file_logging(log_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log dir {}: {}", log_dir.display(), e))?;

    let log_path = log_dir.join(LOG_FILE_NAME);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to open log file {}: {}", log_path.display(), e))?;

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    tlog!("[logging] File logging started: {}", log_path.display());
    Ok(log_path)
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = None;
    }
}
