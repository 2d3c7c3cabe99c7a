//! Startup Configuration
//!
//! emberkv takes at most one positional argument: the path to a
//! configuration file. Without it, built-in defaults apply.
//!
//! The file format is line-based: one directive per line, tokens
//! separated by single spaces, `#` starts a comment, blank lines are
//! skipped.
//!
//! ## Directives
//!
//! | Directive | Meaning |
//! |-----------|---------|
//! | `port <n>` | TCP port to listen on |
//! | `timeout <secs>` | close clients idle for more than this many seconds |
//! | `save <secs> <changes>` | append a save-policy rule (clears the defaults first) |
//! | `databases <n>` | number of selectable keyspaces |
//! | `loglevel debug\|notice\|warning` | log verbosity |
//! | `logfile <path>` | log destination (`stdout` for standard output) |
//! | `dir <path>` | working directory for the snapshot file |
//! | `dbfilename <name>` | snapshot file name |
//!
//! Any unknown directive or invalid value is fatal: the server reports
//! the offending line and refuses to start.

use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::Level;

use crate::server::SaveRule;
use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// Default client idle timeout in seconds (5 minutes).
pub const DEFAULT_MAX_IDLE_SECS: u64 = 60 * 5;

/// Default number of selectable databases.
pub const DEFAULT_DB_COUNT: usize = 16;

/// Default snapshot file name.
pub const DEFAULT_DB_FILENAME: &str = "dump.edb";

/// Errors raised while reading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be opened or read
    #[error("can't open config file: {0}")]
    Io(#[from] std::io::Error),

    /// A directive failed to parse or validate
    #[error("config file error at line {line}: {reason} >>> '{text}'")]
    Directive {
        line: usize,
        reason: String,
        text: String,
    },
}

/// Log verbosity levels accepted by the `loglevel` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Notice,
    Warning,
}

impl LogLevel {
    /// Maps the configured verbosity onto a tracing level filter.
    pub fn as_tracing_level(self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Notice => Level::INFO,
            LogLevel::Warning => Level::WARN,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Notice => write!(f, "notice"),
            LogLevel::Warning => write!(f, "warning"),
        }
    }
}

/// Server configuration, built from defaults and optionally a config file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Seconds of inactivity after which a client is closed
    pub max_idle_secs: u64,
    /// Number of selectable databases
    pub db_count: usize,
    /// Save-policy rules evaluated by the maintenance cron
    pub save_rules: Vec<SaveRule>,
    /// Log verbosity
    pub log_level: LogLevel,
    /// Log file path; `None` logs to standard output
    pub log_file: Option<String>,
    /// Snapshot file name
    pub db_filename: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_idle_secs: DEFAULT_MAX_IDLE_SECS,
            db_count: DEFAULT_DB_COUNT,
            save_rules: vec![
                SaveRule::new(60 * 60, 1),
                SaveRule::new(300, 100),
                SaveRule::new(60, 10_000),
            ],
            log_level: LogLevel::Debug,
            log_file: None,
            db_filename: DEFAULT_DB_FILENAME.to_string(),
        }
    }
}

impl Config {
    /// Loads a configuration file on top of the defaults.
    ///
    /// The first `save` directive encountered clears the built-in rules,
    /// so a config file fully owns the save policy once it mentions it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Config::default();
        let mut save_rules_reset = false;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = line.split(' ').filter(|t| !t.is_empty()).collect();

            let err = |reason: &str| ConfigError::Directive {
                line: line_no,
                reason: reason.to_string(),
                text: line.to_string(),
            };

            match (tokens[0], tokens.len()) {
                ("port", 2) => {
                    config.port = tokens[1].parse().map_err(|_| err("invalid port"))?;
                }
                ("timeout", 2) => {
                    let secs: u64 = tokens[1]
                        .parse()
                        .map_err(|_| err("invalid timeout value"))?;
                    if secs < 1 {
                        return Err(err("invalid timeout value"));
                    }
                    config.max_idle_secs = secs;
                }
                ("save", 3) => {
                    let seconds: u64 = tokens[1]
                        .parse()
                        .map_err(|_| err("invalid save parameters"))?;
                    let changes: u64 = tokens[2]
                        .parse()
                        .map_err(|_| err("invalid save parameters"))?;
                    if seconds < 1 {
                        return Err(err("invalid save parameters"));
                    }
                    if !save_rules_reset {
                        config.save_rules.clear();
                        save_rules_reset = true;
                    }
                    config.save_rules.push(SaveRule::new(seconds, changes));
                }
                ("databases", 2) => {
                    let n: usize = tokens[1]
                        .parse()
                        .map_err(|_| err("invalid number of databases"))?;
                    if n < 1 {
                        return Err(err("invalid number of databases"));
                    }
                    config.db_count = n;
                }
                ("loglevel", 2) => {
                    config.log_level = match tokens[1] {
                        "debug" => LogLevel::Debug,
                        "notice" => LogLevel::Notice,
                        "warning" => LogLevel::Warning,
                        _ => {
                            return Err(err(
                                "invalid log level, must be one of debug, notice, warning",
                            ))
                        }
                    };
                }
                ("logfile", 2) => {
                    config.log_file = if tokens[1] == "stdout" {
                        None
                    } else {
                        Some(tokens[1].to_string())
                    };
                }
                ("dir", 2) => {
                    std::env::set_current_dir(tokens[1])
                        .map_err(|_| err("can't chdir to directory"))?;
                }
                ("dbfilename", 2) => {
                    config.db_filename = tokens[1].to_string();
                }
                _ => return Err(err("bad directive or wrong number of arguments")),
            }
        }

        Ok(config)
    }

    /// Returns the bind address as a string.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "emberkv_config_{}_{}.conf",
            std::process::id(),
            n
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.db_count, 16);
        assert_eq!(config.max_idle_secs, 300);
        assert_eq!(config.save_rules.len(), 3);
        assert_eq!(config.db_filename, "dump.edb");
    }

    #[test]
    fn test_full_file() {
        let path = write_temp(
            "# comment line\n\
             port 7000\n\
             timeout 30\n\
             \n\
             databases 4\n\
             loglevel warning\n\
             dbfilename data.edb\n",
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.max_idle_secs, 30);
        assert_eq!(config.db_count, 4);
        assert_eq!(config.log_level, LogLevel::Warning);
        assert_eq!(config.db_filename, "data.edb");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_save_directives_replace_defaults() {
        let path = write_temp("save 900 1\nsave 300 10\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.save_rules.len(), 2);
        assert_eq!(config.save_rules[0].seconds, 900);
        assert_eq!(config.save_rules[0].changes, 1);
        assert_eq!(config.save_rules[1].seconds, 300);
        assert_eq!(config.save_rules[1].changes, 10);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_bad_directive_reports_line() {
        let path = write_temp("port 7000\nnonsense 1 2 3\n");
        let e = Config::load(&path).unwrap_err();
        match e {
            ConfigError::Directive { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let path = write_temp("timeout 0\n");
        assert!(Config::load(&path).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_logfile_stdout_means_none() {
        let path = write_temp("logfile stdout\n");
        let config = Config::load(&path).unwrap();
        assert!(config.log_file.is_none());
        std::fs::remove_file(path).ok();
    }
}
