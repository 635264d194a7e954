use crate::StoreError;

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Top-level directory every slug entry is placed under.
pub const SLUG_ROOT: &str = "app";

/// Pack `source_dir` into a gzip-compressed tarball at `dest` and return its
/// size in bytes.
///
/// The archive is written to a temp file next to `dest` and renamed into
/// place, so `dest` is either absent or complete.
///
/// Determinism guarantees:
/// - Entries sorted by file name at every level, rooted at `app/`
/// - All timestamps set to 0 (Unix epoch)
/// - All ownership set to 0:0, user and group names `root`
/// - Permission bits preserved from the source
/// - Symlinks dereferenced; dangling links are skipped
pub fn pack_slug(source_dir: &Path, dest: &Path) -> Result<u64, StoreError> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let root_meta = fs::metadata(source_dir)?;
    fs::create_dir_all(&parent)?;

    let tmp = NamedTempFile::new_in(&parent)?;
    let encoder = GzEncoder::new(BufWriter::new(tmp), Compression::default());
    let mut ar = tar::Builder::new(encoder);
    append_dir(&mut ar, Path::new(SLUG_ROOT), &root_meta)?;

    let mut entries = 0usize;
    let walker = WalkDir::new(source_dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.loop_ancestor().is_some() => {
                warn!("skipping symlink loop at {}", display_path(e.path()));
                continue;
            }
            Err(e) if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                warn!("skipping dangling symlink {}", display_path(e.path()));
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let rel = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| StoreError::Archive(format!("path strip: {e}")))?;
        let name = Path::new(SLUG_ROOT).join(rel);
        let meta = entry.metadata()?;

        if meta.is_dir() {
            append_dir(&mut ar, &name, &meta)?;
        } else if meta.is_file() {
            append_file(&mut ar, &name, entry.path(), &meta)?;
        } else {
            warn!("skipping unsupported file type: {}", entry.path().display());
            continue;
        }
        entries += 1;
    }

    let encoder = ar.into_inner()?;
    let writer = encoder.finish()?;
    let tmp = writer.into_inner().map_err(|e| e.into_error())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;

    let size = fs::metadata(dest)?.len();
    debug!("packed {entries} entries into {} ({size} bytes)", dest.display());
    Ok(size)
}

fn display_path(path: Option<&Path>) -> String {
    path.map_or_else(|| "<unknown>".to_owned(), |p| p.display().to_string())
}

fn make_header(meta: &fs::Metadata, entry_type: tar::EntryType) -> Result<tar::Header, StoreError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    header.set_mode(meta.permissions().mode() & 0o7777);
    Ok(header)
}

fn append_dir<W: io::Write>(
    ar: &mut tar::Builder<W>,
    name: &Path,
    meta: &fs::Metadata,
) -> Result<(), StoreError> {
    let mut header = make_header(meta, tar::EntryType::Directory)?;
    header.set_size(0);
    ar.append_data(&mut header, name, io::empty())?;
    Ok(())
}

fn append_file<W: io::Write>(
    ar: &mut tar::Builder<W>,
    name: &Path,
    full_path: &Path,
    meta: &fs::Metadata,
) -> Result<(), StoreError> {
    let size = meta.len();
    let mut header = make_header(meta, tar::EntryType::Regular)?;
    header.set_size(size);
    let mut data = File::open(full_path)?.take(size);
    ar.append_data(&mut header, name, &mut data)?;
    if data.limit() != 0 {
        return Err(StoreError::Archive(format!(
            "{} shrank while being archived",
            full_path.display()
        )));
    }
    Ok(())
}
