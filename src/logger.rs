//! A module to initialize and customize the logger object used in (most) stdout.
//!
//! Workers write into per-worker in-memory buffers so that concurrent file
//! checkups don't interleave on stdout; the orchestrator drains a buffer to
//! the real stdout at that file's log-group boundary.

use std::io::Write;
use std::sync::Mutex;

// non-std crates
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

thread_local! {
    /// When set, log output from this thread is appended here instead of
    /// going straight to stdout. Workers install one of these for the
    /// duration of a single file's checkup.
    static WORKER_BUFFER: std::cell::RefCell<Option<std::sync::Arc<Mutex<Vec<u8>>>>> =
        std::cell::RefCell::new(None);
}

struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("{}: {}\n", record.level(), record.args());
        let wrote_to_buffer = WORKER_BUFFER.with(|cell| {
            if let Some(buf) = cell.borrow().as_ref() {
                if let Ok(mut guard) = buf.lock() {
                    let _ = guard.write_all(line.as_bytes());
                    return true;
                }
            }
            false
        });
        if !wrote_to_buffer {
            print!("{line}");
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

/// A private constant to manage the application's logger object.
static LOGGER: SimpleLogger = SimpleLogger;

/// A function to initialize the private `LOGGER`.
///
/// The logging level defaults to [`LevelFilter::Info`].
/// Returns a [`SetLoggerError`] if the `LOGGER` is already initialized.
pub fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Info))
}

/// This prints a line to indicate the beginning of a related group of log statements.
pub fn start_log_group(name: &str) {
    println!("::group::{name}");
}

/// This prints a line to indicate the ending of a related group of log statements.
pub fn end_log_group() {
    println!("::endgroup::");
}

/// A handle to a single worker's buffered log output.
///
/// Dropping the guard (via [`WorkerLog::finish`]) detaches the thread-local
/// buffer; the caller is responsible for draining and printing it.
pub struct WorkerLog {
    buffer: std::sync::Arc<Mutex<Vec<u8>>>,
}

impl WorkerLog {
    /// Install a fresh buffer for the calling thread.
    pub fn init() -> Self {
        let buffer = std::sync::Arc::new(Mutex::new(Vec::new()));
        WORKER_BUFFER.with(|cell| *cell.borrow_mut() = Some(buffer.clone()));
        WorkerLog { buffer }
    }

    /// Detach the buffer from this thread and return its contents as text.
    pub fn finish(self) -> String {
        WORKER_BUFFER.with(|cell| *cell.borrow_mut() = None);
        let guard = self.buffer.lock().expect("worker log mutex poisoned");
        String::from_utf8_lossy(&guard).into_owned()
    }
}

/// Drain a worker's buffered output to stdout, framed by a log group named
/// after the file it concerns.
pub fn drain_worker_log(file_name: &str, log: WorkerLog) {
    start_log_group(&format!("Performing checkup on {file_name}"));
    let contents = log.finish();
    print!("{contents}");
    end_log_group();
}

#[cfg(test)]
mod tests {
    use super::{end_log_group, start_log_group, WorkerLog};

    #[test]
    fn issue_log_grouping_stdout() {
        start_log_group("a dumb test");
        end_log_group();
    }

    #[test]
    fn worker_buffer_captures_log_lines() {
        let log = WorkerLog::init();
        log::info!("hello from a worker");
        let contents = log.finish();
        assert!(contents.contains("hello from a worker"));
    }
}
