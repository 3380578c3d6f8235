// src/logging.rs
//
// Timestamped logging for the driver.
//
// Every line goes to stderr. Once `init_file_logging` has run, lines are also
// appended to `<dir>/YYYYMMDD-HHMMSS-ControlCAN.log`, with a `ControlCAN.log`
// symlink (Unix) pointing at the newest file. Host applications usually load
// the library without a console, so the file is the only durable trace.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};

use crate::io::error::{CanError, Result};

#[cfg(unix)]
const SYMLINK_NAME: &str = "ControlCAN.log";

/// Open log file. When `Some`, `tlog!` writes to both stderr and this file.
static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

fn clock() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Log file name for a session started at `started`
pub(crate) fn log_file_name(started: &DateTime<Local>) -> String {
    started.format("%Y%m%d-%H%M%S-ControlCAN.log").to_string()
}

/// Start appending log lines to a new file in `log_dir`.
pub(crate) fn init_file_logging(log_dir: &Path) -> Result<PathBuf> {
    let fail = |what: &str, e: std::io::Error| {
        CanError::Settings(format!("log dir {}: {}: {}", log_dir.display(), what, e))
    };

    std::fs::create_dir_all(log_dir).map_err(|e| fail("create", e))?;

    let filename = log_file_name(&Local::now());
    let path = log_dir.join(&filename);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| fail("open log file", e))?;

    #[cfg(unix)]
    {
        let link = log_dir.join(SYMLINK_NAME);
        let _ = std::fs::remove_file(&link);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &link) {
            eprintln!("{} [logging] {} not updated: {}", clock(), SYMLINK_NAME, e);
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }
    write_line(&format!("[logging] File logging started: {}", path.display()));
    Ok(path)
}

/// Emit one timestamped line. Used through `tlog!`.
pub(crate) fn write_line(message: &str) {
    let line = format!("{} {}", clock(), message);
    eprintln!("{}", line);
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time; also writes to the log file when one is open.
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::logging::write_line(&format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_name() {
        let started = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(log_file_name(&started), "20240102-030405-ControlCAN.log");
    }

    #[test]
    fn test_file_logging_writes_lines() {
        let dir = std::env::temp_dir().join(format!("controlcan-log-{}", std::process::id()));
        let path = init_file_logging(&dir).unwrap();
        assert!(path.starts_with(&dir));
        tlog!("[test] hello {}", 42);
        LOG_FILE.lock().unwrap().take();

        let content = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
        assert!(content.contains("[test] hello 42"));
        assert!(content.contains("File logging started"));
    }
}
