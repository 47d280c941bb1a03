//! Logging configuration module
//!
//! Single-line process logging on top of the `log` facade:
//! - Log levels (trace, debug, info, warn, error, off)
//! - Optional file sink, stderr by default

use crate::config::AgentConfig;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

/// Agent log levels mapped to Rust log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl AgentLogLevel {
    /// Parse a log level string; unknown values default to `info`.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            "off" | "nothing" => Self::Off,
            _ => Self::Info,
        }
    }

    /// Convert to Rust log LevelFilter
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            Self::Trace => LevelFilter::Trace,
            Self::Debug => LevelFilter::Debug,
            Self::Info => LevelFilter::Info,
            Self::Warn => LevelFilter::Warn,
            Self::Error => LevelFilter::Error,
            Self::Off => LevelFilter::Off,
        }
    }
}

/// Logger that writes to a file when configured, stderr otherwise.
pub struct AgentLogger {
    level: LevelFilter,
    file: Option<Mutex<File>>,
}

impl AgentLogger {
    pub fn new(config: &AgentConfig) -> Self {
        let level = AgentLogLevel::from_str(&config.log_level).to_level_filter();

        let file = if !config.log_file.is_empty() {
            match OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.log_file)
            {
                Ok(f) => Some(Mutex::new(f)),
                Err(e) => {
                    eprintln!(
                        "Warning: Failed to open log file '{}': {}",
                        config.log_file, e
                    );
                    None
                }
            }
        } else {
            None
        };

        Self { level, file }
    }

    fn format_record(&self, record: &Record) -> String {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        format!(
            "{}:{} {} [{}] {}\n",
            std::process::id(),
            record.level().as_str().to_lowercase(),
            now,
            record.target(),
            record.args()
        )
    }
}

impl Log for AgentLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let formatted = self.format_record(record);

        if let Some(ref file) = self.file {
            if let Ok(mut f) = file.lock() {
                let _ = f.write_all(formatted.as_bytes());
            }
        } else {
            eprint!("{}", formatted);
        }
    }

    fn flush(&self) {
        if let Some(ref file) = self.file {
            if let Ok(mut f) = file.lock() {
                let _ = f.flush();
            }
        }
    }
}

/// Initialize logging from the agent config
pub fn init_logging(config: &AgentConfig) -> Result<(), log::SetLoggerError> {
    let logger = Box::new(AgentLogger::new(config));
    let level = AgentLogLevel::from_str(&config.log_level).to_level_filter();

    log::set_boxed_logger(logger)?;
    log::set_max_level(level);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(
            AgentLogLevel::from_str("trace").to_level_filter(),
            LevelFilter::Trace
        );
        assert_eq!(
            AgentLogLevel::from_str("debug").to_level_filter(),
            LevelFilter::Debug
        );
        assert_eq!(
            AgentLogLevel::from_str("warning").to_level_filter(),
            LevelFilter::Warn
        );
        assert_eq!(
            AgentLogLevel::from_str("off").to_level_filter(),
            LevelFilter::Off
        );
        // Unknown defaults to info
        assert_eq!(
            AgentLogLevel::from_str("unknown").to_level_filter(),
            LevelFilter::Info
        );
    }
}
