//! Buildpack acquisition for slugc.
//!
//! `BuildpackFetcher` resolves a `BuildpackSource` into a local directory:
//! HTTP(S) tarballs are streamed through gzip and tar straight into the
//! destination with a bounded retry budget, local directories are copied,
//! and anything else is cloned with git. The whole fetch runs under one
//! deadline.

pub mod fetch;
mod git;
mod local;
mod tarball;

pub use fetch::{BuildpackFetcher, RetryPolicy, EXECUTABLES};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("fetching {url} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("buildpack fetch timed out after {}s", timeout.as_secs())]
    Timeout { timeout: Duration },
    #[error("git error: {0}")]
    Git(String),
    #[error("runtime error: {0}")]
    Runtime(#[from] slugc_runtime::RuntimeError),
}
