//! Slug compile pipeline.
//!
//! This crate ties together buildpack acquisition, subprocess execution and
//! tree/archive handling into the `Compiler`: fetch a buildpack, run its
//! `detect` and `compile` scripts against a build directory, prune the tree,
//! discover process types, and pack the result into a slug. Failures carry
//! an explicit `ErrorKind` so callers can tell infrastructure problems from
//! builds the application or buildpack rejected.

pub mod output;
pub mod pipeline;
pub mod settings;
pub mod stage;
mod timing;

pub use output::{BuildOutput, CapturedOutput};
pub use pipeline::{BuildRequest, BuildResult, Compiler, SlugSizes, PROCESSES_FILE, SLUG_FILE};
pub use settings::{compile_env, Settings, RESERVED_ENV};
pub use stage::{validate_transition, InvalidTransition, Stage, StageTracker};

use std::fmt;
use thiserror::Error;

/// Who is responsible for a failed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// The build environment is broken; retry or escalate to an operator.
    Infrastructure,
    /// The application or its buildpack rejected the build; report back.
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fetch,
    Archive,
    Detect,
    Compile,
}

impl ErrorKind {
    pub fn tier(self) -> Tier {
        match self {
            Self::Fetch | Self::Archive => Tier::Infrastructure,
            Self::Detect | Self::Compile => Tier::User,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fetch => "fetch",
            Self::Archive => "archive",
            Self::Detect => "detect",
            Self::Compile => "compile",
        };
        f.write_str(s)
    }
}

/// A failed compile: what kind of failure, which stage it happened in, and
/// the tail of any script output that explains it.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CompileError {
    kind: ErrorKind,
    stage: Stage,
    message: String,
    output: Vec<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
            output: Vec::new(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_output(mut self, output: Vec<String>) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn tier(&self) -> Tier {
        self.kind.tier()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Last lines of captured script output, oldest first.
    pub fn output(&self) -> &[String] {
        &self.output
    }
}
