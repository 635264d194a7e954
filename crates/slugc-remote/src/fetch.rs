use crate::{git, local, tarball, RemoteError};

use slugc_runtime::CommandRunner;
use slugc_schema::BuildpackSource;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Buildpack scripts made executable after every fetch.
pub const EXECUTABLES: [&str; 3] = ["compile", "detect", "release"];

/// Retry budget for tarball downloads. Other protocols are not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Wall-clock budget shared by every step of one fetch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// Time left, or `RemoteError::Timeout` once the budget is spent.
    pub(crate) fn remaining(&self) -> Result<Duration, RemoteError> {
        let left = self.timeout.saturating_sub(self.start.elapsed());
        if left.is_zero() {
            return Err(RemoteError::Timeout {
                timeout: self.timeout,
            });
        }
        Ok(left)
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }
}

pub struct BuildpackFetcher<'a> {
    runner: &'a dyn CommandRunner,
    retry: RetryPolicy,
}

impl<'a> BuildpackFetcher<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Populate `dest` with the buildpack named by `source`.
    ///
    /// `dest` is created if missing and should be empty. `progress` receives
    /// the operator-facing label for the protocol in use before any I/O
    /// starts. The whole call, retries included, is bounded by `timeout`.
    pub fn fetch(
        &self,
        source: &BuildpackSource,
        dest: &Path,
        timeout: Duration,
        progress: &dyn Fn(&str),
    ) -> Result<(), RemoteError> {
        let deadline = Deadline::new(timeout);
        fs::create_dir_all(dest)?;
        debug!("fetching {} buildpack {source}", source.kind());

        match source {
            BuildpackSource::Tarball { url } => {
                progress("Fetching buildpack...");
                tarball::fetch(url, dest, &deadline, self.retry)?;
            }
            BuildpackSource::Directory { path } => {
                progress("Copying buildpack...");
                local::copy_tree(path, dest, &deadline)?;
            }
            BuildpackSource::Git { url, reference } => {
                progress("Cloning buildpack...");
                git::clone(self.runner, url, reference.as_deref(), dest, &deadline)?;
            }
        }

        make_executable(dest)?;
        info!(
            "fetched {} buildpack in {}ms",
            source.kind(),
            deadline.start.elapsed().as_millis()
        );
        Ok(())
    }
}

fn make_executable(dest: &Path) -> Result<(), RemoteError> {
    for name in EXECUTABLES {
        let path = dest.join("bin").join(name);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Remove everything inside `dir`, keeping `dir` itself.
pub(crate) fn clear_dir(dir: &Path) -> Result<(), RemoteError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
