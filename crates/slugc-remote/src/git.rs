use crate::fetch::Deadline;
use crate::RemoteError;

use slugc_runtime::{CommandRunner, CommandSpec, RunOutput, ScopedEnv};
use std::path::Path;
use tracing::debug;

/// Overrides the repository git operates on; must not leak into the clone.
const GIT_DIR: &str = "GIT_DIR";

/// `git clone <url> <dest>`, then `git checkout <reference>` inside `dest`
/// when a reference is given. Both commands share the fetch deadline.
///
/// A reference starting with `-` would be read as an option and is rejected
/// before anything runs.
pub(crate) fn clone(
    runner: &dyn CommandRunner,
    url: &str,
    reference: Option<&str>,
    dest: &Path,
    deadline: &Deadline,
) -> Result<(), RemoteError> {
    if let Some(reference) = reference.filter(|r| r.starts_with('-')) {
        return Err(RemoteError::Git(format!("invalid git reference '{reference}'")));
    }

    let mut env = ScopedEnv::new();
    env.unset(GIT_DIR);

    let clone = CommandSpec::new("git")
        .arg("clone")
        .arg("--")
        .arg(url)
        .arg(dest.as_os_str());
    run_git(runner, &clone, deadline)?;

    if let Some(reference) = reference {
        let checkout = CommandSpec::new("git")
            .arg("checkout")
            .arg("--quiet")
            .arg(reference)
            .current_dir(dest);
        run_git(runner, &checkout, deadline)?;
    }
    Ok(())
}

fn run_git(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    deadline: &Deadline,
) -> Result<RunOutput, RemoteError> {
    let remaining = deadline.remaining()?;
    let sink = |line: &str| debug!("git: {line}");
    let output = match runner.run(spec, remaining, Some(&sink)) {
        Ok(output) => output,
        Err(slugc_runtime::RuntimeError::Timeout { .. }) => {
            return Err(RemoteError::Timeout {
                timeout: deadline.timeout(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    if !output.success() {
        let tail = output.tail(5).join("\n");
        return Err(RemoteError::Git(format!(
            "'{spec}' exited with {}: {tail}",
            output.status
        )));
    }
    Ok(output)
}
