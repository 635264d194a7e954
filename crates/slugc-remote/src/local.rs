use crate::fetch::Deadline;
use crate::RemoteError;

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Copy the contents of `src` into `dest`, preserving permission bits and
/// recreating symlinks as symlinks. The deadline is checked between entries.
pub(crate) fn copy_tree(src: &Path, dest: &Path, deadline: &Deadline) -> Result<(), RemoteError> {
    // Directory modes are applied last so read-only directories can still
    // be filled.
    let mut dir_modes = Vec::new();
    let mut copied = 0usize;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        deadline.remaining()?;
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(format!("path strip: {e}")))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            dir_modes.push((target, entry.metadata().map_err(io::Error::from)?.permissions()));
        } else if file_type.is_symlink() {
            symlink(fs::read_link(entry.path())?, &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            warn!("skipping unsupported file type: {}", entry.path().display());
            continue;
        }
        copied += 1;
    }

    for (dir, perms) in dir_modes.into_iter().rev() {
        fs::set_permissions(dir, perms)?;
    }
    debug!("copied {copied} entries from {}", src.display());
    Ok(())
}
