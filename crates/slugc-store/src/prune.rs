use crate::ignore::IgnoreFilter;
use crate::StoreError;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const SLUGIGNORE_FILE: &str = ".slugignore";

const ALWAYS_REMOVED: [&str; 2] = [".git", "tmp"];
const JUNK_FILE: &str = ".DS_Store";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Paths removed because of `.slugignore`; `None` when the file is absent.
    pub slugignore_removed: Option<usize>,
    pub junk_removed: usize,
}

/// Trim a build tree in place before archiving.
///
/// Removes `.git` and `tmp` at the root, every `.DS_Store` file, and every
/// path matched by the root `.slugignore`.
pub fn prune_build_dir(build_dir: &Path) -> Result<PruneReport, StoreError> {
    for name in ALWAYS_REMOVED {
        if remove_path(&build_dir.join(name))? {
            debug!("removed {name} from build tree");
        }
    }

    let mut report = PruneReport::default();
    for path in find_junk(build_dir)? {
        if remove_path(&path)? {
            report.junk_removed += 1;
        }
    }

    let Some(filter) = IgnoreFilter::from_file(&build_dir.join(SLUGIGNORE_FILE))? else {
        return Ok(report);
    };
    let mut removed = 0;
    for path in filter.resolve(build_dir)? {
        if remove_path(&path)? {
            removed += 1;
        }
    }
    debug!("removed {removed} paths matching {SLUGIGNORE_FILE}");
    report.slugignore_removed = Some(removed);
    Ok(report)
}

fn find_junk(root: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut junk = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_name() == JUNK_FILE && !entry.file_type().is_dir() {
            junk.push(entry.into_path());
        }
    }
    Ok(junk)
}

/// Remove a file, symlink or directory tree. Returns `false` if nothing was
/// there, which happens when a parent was already removed.
fn remove_path(path: &Path) -> Result<bool, StoreError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
