// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, ErrorKind};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 16768;

/// Threshold for log emission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("debug") {
            Ok(Self::Debug)
        } else if s.eq_ignore_ascii_case("info") {
            Ok(Self::Info)
        } else if s.eq_ignore_ascii_case("warning") {
            Ok(Self::Warning)
        } else if s.eq_ignore_ascii_case("error") {
            Ok(Self::Error)
        } else {
            Err(Error::from_string(
                ErrorKind::ConfigError,
                format!("config: invalid log_verbosity `{s}`"),
            ))
        }
    }
}

/// Broker configuration.
///
/// Loaded from a `key value` text file, one pair per line. `#` begins a
/// comment and blank lines are ignored. Keys the broker does not recognize
/// are ignored so deployments can carry extra keys for outer tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Listening address, an IP literal.
    pub host: String,

    /// Listening TCP port.
    pub port: u16,

    /// Threshold for log emission.
    pub log_verbosity: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            log_verbosity: LogLevel::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or a recognized key has an
    /// invalid value.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = fs::read_to_string(&path).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("config: failed to read {:?}, {err}", path.as_ref()),
            )
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from file content.
    ///
    /// # Errors
    ///
    /// Returns error if a recognized key has an invalid value or a line has
    /// a key without a value.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let mut config = Self::default();

        for (line_nr, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once(char::is_whitespace).ok_or_else(|| {
                Error::from_string(
                    ErrorKind::ConfigError,
                    format!("config: missing value at line {}", line_nr + 1),
                )
            })?;
            config.set(key, value.trim())?;
        }

        Ok(config)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            "host" => self.host = value.to_owned(),
            "port" => {
                self.port = value.parse().map_err(|err| {
                    Error::from_string(
                        ErrorKind::ConfigError,
                        format!("config: invalid port `{value}`, {err}"),
                    )
                })?;
            }
            "log_verbosity" => self.log_verbosity = value.parse()?,
            _ => log::debug!("config: ignoring unknown key `{key}`"),
        }
        Ok(())
    }

    /// Listening endpoint in `host:port` form.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.address(), "127.0.0.1:16768");
        assert_eq!(config.log_verbosity, LogLevel::Info);
    }

    #[test]
    fn test_parse() {
        let content = r"
# broker settings
host 0.0.0.0
port 1883

log_verbosity warning
some_future_key with spaces in the value
";
        let config = Config::parse(content).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 1883);
        assert_eq!(config.log_verbosity, LogLevel::Warning);
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(Config::parse("port notanumber").is_err());
        assert!(Config::parse("log_verbosity loud").is_err());
        assert!(Config::parse("orphan_key").is_err());
    }

    #[test]
    fn test_log_level_is_case_insensitive() {
        assert_eq!(LogLevel::from_str("DEBUG").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("Error").unwrap(), LogLevel::Error);
    }
}
