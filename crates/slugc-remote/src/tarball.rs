use crate::fetch::{clear_dir, Deadline, RetryPolicy};
use crate::RemoteError;

use flate2::read::GzDecoder;
use std::path::Path;
use std::thread;
use tracing::{debug, warn};

enum Failure {
    /// Worth another attempt: transport errors, 5xx, 408, 429, broken streams.
    Transient(String),
    Fatal(RemoteError),
}

/// Download `url` and unpack it into `dest`, retrying transient failures
/// with exponential backoff. `dest` is emptied before each retry.
pub(crate) fn fetch(
    url: &str,
    dest: &Path,
    deadline: &Deadline,
    retry: RetryPolicy,
) -> Result<(), RemoteError> {
    let attempts = retry.attempts.max(1);
    let mut backoff = retry.initial_backoff;
    let mut last = String::new();

    for attempt in 1..=attempts {
        let remaining = deadline.remaining()?;
        debug!(
            "GET {url} (attempt {attempt}/{attempts}, {}ms of {}s left)",
            remaining.as_millis(),
            deadline.timeout().as_secs()
        );
        match download_once(url, dest, remaining) {
            Ok(()) => return Ok(()),
            Err(Failure::Fatal(e)) => return Err(e),
            Err(Failure::Transient(msg)) => {
                warn!("buildpack download attempt {attempt}/{attempts} failed: {msg}");
                last = msg;
                clear_dir(dest)?;
            }
        }
        if attempt < attempts {
            let remaining = deadline.remaining()?;
            thread::sleep(backoff.min(remaining));
            backoff = backoff.saturating_mul(2);
        }
    }

    Err(RemoteError::RetriesExhausted {
        url: url.to_owned(),
        attempts,
        last,
    })
}

fn download_once(url: &str, dest: &Path, timeout: std::time::Duration) -> Result<(), Failure> {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    let agent = ureq::Agent::new_with_config(config);

    let resp = match agent.get(url).call() {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(code)) if is_transient_status(code) => {
            return Err(Failure::Transient(format!("HTTP {code} for {url}")));
        }
        Err(ureq::Error::StatusCode(code)) => {
            return Err(Failure::Fatal(RemoteError::Http(format!(
                "HTTP {code} for {url}"
            ))));
        }
        Err(e) => return Err(Failure::Transient(e.to_string())),
    };

    let reader = resp.into_body().into_reader();
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(false);
    archive.set_unpack_xattrs(false);
    archive
        .unpack(dest)
        .map_err(|e| Failure::Transient(format!("extracting {url}: {e}")))
}

fn is_transient_status(code: u16) -> bool {
    code >= 500 || code == 408 || code == 429
}
