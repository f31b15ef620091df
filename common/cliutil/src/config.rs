// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::Result;

use crate::LoggingConfig;

fn unwrap_or_else<T, F>(value: Option<T>, default: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match value {
        Some(value) => Ok(value),
        None => default(),
    }
}

/// Builds a [`Config`] for [`crate::cli_main`]. Most callers should just use
/// `Config::default()`.
#[derive(Default)]
pub struct ConfigBuilder {
    logging: Option<LoggingConfig>,
    log_command_line: bool,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            logging: None,
            log_command_line: true,
        }
    }

    /// Overrides the logging config. Defaults to `LoggingConfig::from_env()`.
    pub fn logging(mut self, cfg: LoggingConfig) -> Self {
        self.logging = Some(cfg);
        self
    }

    pub fn log_command_line(mut self, enable: bool) -> Self {
        self.log_command_line = enable;
        self
    }

    pub fn build(self) -> Result<Config> {
        Ok(Config {
            logging: unwrap_or_else(self.logging, LoggingConfig::from_env)?,
            log_command_line: self.log_command_line,
        })
    }
}

/// The configuration applied by [`crate::cli_main`].
pub struct Config {
    pub(crate) logging: LoggingConfig,
    pub(crate) log_command_line: bool,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::new().build().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_config_respects_overrides() {
        let config = ConfigBuilder::new().log_command_line(false).build().unwrap();
        assert!(!config.log_command_line);
    }
}
