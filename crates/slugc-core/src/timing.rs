use std::fmt::Display;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run `f`, logging `at=start`, then `at=finish` or `at=error` with the
/// elapsed seconds.
pub(crate) fn timed<T, E: Display>(name: &str, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
    let start = Instant::now();
    debug!(step = name, "at=start");
    let result = f();
    let elapsed = start.elapsed().as_secs_f64();
    match &result {
        Ok(_) => info!(step = name, elapsed, "at=finish"),
        Err(e) => warn!(step = name, elapsed, error = %e, "at=error"),
    }
    result
}
