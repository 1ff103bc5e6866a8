//! Logging (spec §9 ambient stack): a [`log::Log`] implementation that
//! timestamps and writes every record to an epoch-named file, with a
//! `last` symlink always pointing at the current one, plus an optional
//! mirror to stderr.
//!
//! Grounded in `original_source/mato/mato_logs.c`'s `mato_logs_init`
//! (filename built from `logs_path/<epoch seconds>_<suffix>`, then
//! `symlink()`ed to a fixed "last log" path) and `mato_log`'s line format
//! (millisecond timestamp, severity, thread name, message). The dedicated
//! writer thread replaces the original's per-call `fopen(path, "a+")` with
//! one long-lived `BufWriter`, draining a channel so logging from any
//! async task never blocks on file I/O.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;

use log::{Level, LevelFilter, Log, Metadata, Record};

struct LogLine {
    millis_since_epoch: u128,
    level: Level,
    thread_name: String,
    target: String,
    message: String,
}

/// Forwards every record accepted by the `log` facade to a writer thread.
/// Install with [`init`].
pub(crate) struct FileLogger {
    tx: std_mpsc::Sender<LogLine>,
    print_to_console: bool,
    max_level: LevelFilter,
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = LogLine {
            millis_since_epoch: now_millis(),
            level: record.level(),
            thread_name: std::thread::current()
                .name()
                .unwrap_or("unnamed")
                .to_owned(),
            target: record.target().to_owned(),
            message: format!("{}", record.args()),
        };
        if self.print_to_console {
            eprintln!(
                "[{}] {} {}: {}",
                line.millis_since_epoch, line.level, line.thread_name, line.message
            );
        }
        // A full channel-send failure means the writer thread has already
        // exited (shutdown); dropping the line is acceptable at that point.
        let _ = self.tx.send(line);
    }

    fn flush(&self) {}
}

fn now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn write_loop(rx: std_mpsc::Receiver<LogLine>, file: File) {
    let mut writer = BufWriter::new(file);
    while let Ok(line) = rx.recv() {
        let _ = writeln!(
            writer,
            "{} {} [{}] {}: {}",
            line.millis_since_epoch, line.level, line.thread_name, line.target, line.message
        );
        let _ = writer.flush();
    }
}

/// Picks `<logs_dir>/<epoch_seconds>_<suffix>` as the original did, and
/// points `<logs_dir>/last` at it via a symlink, replacing whatever it
/// previously pointed to.
fn open_log_file(logs_dir: &Path, suffix: &str) -> std::io::Result<(PathBuf, File)> {
    std::fs::create_dir_all(logs_dir)?;
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let filename = if suffix.is_empty() {
        format!("{epoch}")
    } else {
        format!("{epoch}_{suffix}")
    };
    let path = logs_dir.join(filename);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let last_link = logs_dir.join("last");
    let _ = std::fs::remove_file(&last_link);
    #[cfg(unix)]
    {
        let _ = std::os::unix::fs::symlink(&path, &last_link);
    }
    Ok((path, file))
}

/// Initializes the global `log` facade: opens the epoch-named log file
/// under `logs_dir`, spawns its writer thread, and installs the logger.
/// Must be called once, before the first log line (spec §9: mirrors
/// `mato_logs_init` being mandatory before any `mato_log*` call).
pub fn init(logs_dir: &Path, suffix: &str, print_to_console: bool, max_level: LevelFilter) -> std::io::Result<()> {
    let (_path, file) = open_log_file(logs_dir, suffix)?;
    let (tx, rx) = std_mpsc::channel();
    std::thread::Builder::new()
        .name("mato-logs".into())
        .spawn(move || write_loop(rx, file))?;
    let logger = FileLogger {
        tx,
        print_to_console,
        max_level,
    };
    log::set_max_level(max_level);
    let _ = log::set_boxed_logger(Box::new(logger));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_log_file_creates_file_and_last_symlink() {
        let dir = std::env::temp_dir().join(format!("mato_logs_test_{}", std::process::id()));
        let (path, _file) = open_log_file(&dir, "test").unwrap();
        assert!(path.exists());
        let last = dir.join("last");
        assert!(last.symlink_metadata().is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }
}
