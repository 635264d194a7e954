//! Filesystem side of a slug build.
//!
//! This crate provides the storage layer: `IgnoreFilter` for `.slugignore`
//! resolution, `prune_build_dir` for trimming the build tree, `pack_slug` for
//! the deterministic gzip tarball, and `disk_usage` for `du`-style size
//! measurement.

pub mod ignore;
pub mod prune;
pub mod slug;
pub mod usage;

pub use ignore::IgnoreFilter;
pub use prune::{prune_build_dir, PruneReport, SLUGIGNORE_FILE};
pub use slug::{pack_slug, SLUG_ROOT};
pub use usage::disk_usage;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("archive error: {0}")]
    Archive(String),
}
