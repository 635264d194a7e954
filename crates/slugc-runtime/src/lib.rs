//! Subprocess execution for buildpack scripts and version-control tools.
//!
//! This crate implements the execution layer: the `CommandRunner` trait and
//! its `ProcessRunner` implementation (wall-clock deadline, live line
//! streaming, capped capture, process-group termination), plus `ScopedEnv`
//! for reversible mutation of the process environment.

pub mod env;
pub mod process;
pub mod runner;

pub use env::ScopedEnv;
pub use runner::{
    CommandRunner, CommandSpec, OutputLine, ProcessRunner, RunOutput, Stream, CAPTURE_LIMIT,
};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' timed out after {}s", timeout.as_secs())]
    Timeout {
        program: String,
        timeout: Duration,
        exit_code: Option<i32>,
        output: String,
    },
}
