use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use flexi_logger::writers::FileLogWriter;
use flexi_logger::{
    DeferredNow, Duplicate, FileSpec, FlexiLoggerError, LogSpecification, Logger, LoggerHandle,
    WriteMode,
};
use log::Record;

use crate::error::UpgradeError;

// The `log` facade accepts one logger per process. Later streams re-point
// its file writer instead of installing another.
static ACTIVE_LOGGER: OnceLock<Mutex<Option<LoggerHandle>>> = OnceLock::new();

/// One record per line: timestamp, level, message.
pub fn line_format(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> io::Result<()> {
    write!(
        w,
        "{} {:<5} {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.args()
    )
}

/// Where upgrade log records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Log to the console and to the upgrade log file.
    ConsoleAndFile { level: String },
    /// Leave whatever logger the test process already has in place.
    #[cfg(test)]
    Inherited,
}

impl LogTarget {
    pub fn attach(&self, log_file: &Path) -> Result<Option<LogStream>, UpgradeError> {
        match self {
            LogTarget::ConsoleAndFile { level } => LogStream::start(log_file, level).map(Some),
            #[cfg(test)]
            LogTarget::Inherited => Ok(None),
        }
    }
}

/// The console + file logger for one upgrade. Records are flushed when the
/// stream is dropped.
pub struct LogStream {
    handle: LoggerHandle,
}

impl LogStream {
    pub fn start(log_file: &Path, level: &str) -> Result<Self, UpgradeError> {
        let file_spec = file_spec(log_file)?;
        let slot = ACTIVE_LOGGER.get_or_init(|| Mutex::new(None));
        let mut active = slot.lock().map_err(|_| FlexiLoggerError::Poison)?;

        let handle = match active.as_ref() {
            Some(handle) => {
                handle.set_new_spec(LogSpecification::parse(level)?);
                handle.reset_flw(
                    &FileLogWriter::builder(file_spec)
                        .format(line_format)
                        .write_mode(WriteMode::Direct),
                )?;
                handle.clone()
            }
            None => {
                let handle = Logger::try_with_str(level)?
                    .log_to_file(file_spec)
                    .duplicate_to_stdout(Duplicate::All)
                    .format_for_files(line_format)
                    .format_for_stdout(line_format)
                    .write_mode(WriteMode::Direct)
                    .start()?;
                *active = Some(handle.clone());
                handle
            }
        };

        Ok(Self { handle })
    }
}

fn file_spec(log_file: &Path) -> Result<FileSpec, UpgradeError> {
    let directory = log_file.parent().unwrap_or_else(|| Path::new("."));
    let basename = log_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| {
            UpgradeError::precondition(format!("log file {} has no name", log_file.display()))
        })?;

    Ok(FileSpec::default()
        .directory(directory)
        .basename(basename)
        .suppress_timestamp()
        .suffix("log"))
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.handle.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_inherited_target_attaches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let stream = LogTarget::Inherited
            .attach(&dir.path().join("upgrade.log"))
            .unwrap();
        assert!(stream.is_none());
        assert!(!dir.path().join("upgrade.log").exists());
    }

    #[test]
    #[serial]
    fn test_console_and_file_writes_formatted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("upgrade-from-v1.0.0-to-v1.2.0.log");
        let target = LogTarget::ConsoleAndFile {
            level: "info".to_string(),
        };

        let stream = target.attach(&log_file).unwrap().unwrap();
        log::info!("Upgrading Iron Test from v1.0.0 to v1.2.0.");
        log::debug!("filtered out");
        drop(stream);

        let contents = fs::read_to_string(&log_file).unwrap();
        let line = contents
            .lines()
            .find(|l| l.contains("Upgrading Iron Test"))
            .expect("banner line missing");
        // 2024-01-31 12:34:56.789 INFO  Upgrading ...
        let parts: Vec<&str> = line.splitn(4, ' ').collect();
        assert_eq!(parts[0].len(), 10);
        assert_eq!(parts[1].len(), 12);
        assert_eq!(parts[2], "INFO");
        assert!(!contents.contains("filtered out"));
    }

    #[test]
    #[serial]
    fn test_second_stream_moves_to_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.log");
        let second = dir.path().join("second.log");

        let stream = LogStream::start(&first, "info").unwrap();
        log::info!("written to first");
        drop(stream);

        let stream = LogStream::start(&second, "debug").unwrap();
        log::info!("written to second");
        log::debug!("debug now enabled");
        drop(stream);

        let first_contents = fs::read_to_string(&first).unwrap();
        let second_contents = fs::read_to_string(&second).unwrap();
        assert!(first_contents.contains("written to first"));
        assert!(!first_contents.contains("written to second"));
        assert!(second_contents.contains("written to second"));
        assert!(second_contents.contains("debug now enabled"));
    }
}
