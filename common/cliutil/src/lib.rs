// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Functions common to every CLI binary in this workspace: consistent
//! startup/cleanup, structured logging, and top-level error reporting.

use std::ffi::OsStr;
use std::fmt::Debug;
use std::process::{ExitCode, Termination};

use anyhow::Result;
use itertools::Itertools;

mod config;
mod logging;

pub use crate::config::*;
pub use crate::logging::*;

/// Wraps a CLI main function with the common startup/cleanup logic: sets
/// up logging, optionally logs the command line, and turns the returned
/// `Result` into a process exit code.
pub fn cli_main<F, T, E>(main: F, config: Config) -> ExitCode
where
    F: FnOnce() -> Result<T, E>,
    T: Termination,
    E: Debug,
{
    let _log_guard = config.logging.setup().unwrap();
    if config.log_command_line {
        log_current_command_line();
    }
    let result = main();
    handle_top_level_result(result)
}

/// Logs the command line of the current process. Not needed if you use
/// [`cli_main`], which calls this for you.
pub fn log_current_command_line() {
    let escaped_command = std::env::args().map(|s| shell_escape::escape(s.into())).join(" ");
    tracing::info!("COMMAND: {}", escaped_command);
}

/// Handles the top-level `Result` and returns the `ExitCode` to return
/// from `main`. Not needed if you use [`cli_main`].
pub fn handle_top_level_result<T: Termination, E: Debug>(result: Result<T, E>) -> ExitCode {
    match result {
        Err(error) => {
            eprintln!("FATAL: {}: {:?}", get_current_process_name(), error);
            ExitCode::FAILURE
        }
        Ok(value) => value.report(),
    }
}

fn get_current_process_name() -> String {
    let current_exe = std::env::current_exe().unwrap_or_default();
    current_exe
        .file_name()
        .unwrap_or(OsStr::new("__unknown__"))
        .to_string_lossy()
        .into_owned()
}
