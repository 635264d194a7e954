//! Input formats understood by the slug compiler.
//!
//! This crate defines the schema layer: the ordered `ProcessTypes` mapping,
//! the `Procfile` parser, the `bin/release` document parser, buildpack source
//! addressing (`BuildpackSource`), and the `BuildpackConfig` query parameters
//! that become compile-time environment variables.

pub mod config;
pub mod procfile;
pub mod release;
pub mod source;

pub use config::BuildpackConfig;
pub use procfile::{is_valid_process_name, parse_procfile_file, parse_procfile_str, ProcessTypes};
pub use release::parse_release_str;
pub use source::{is_tarball_url, BuildpackSource};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse release output: {0}")]
    Release(#[from] serde_yaml::Error),
}
