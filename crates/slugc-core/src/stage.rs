use crate::ErrorKind;
use std::fmt;
use thiserror::Error;

/// Pipeline stages, in execution order. `Failed` is reachable from any
/// stage that has not finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preparing,
    FetchingBuildpack,
    Detecting,
    Compiling,
    Pruning,
    ExtractingProcessTypes,
    Archiving,
    MeasuringSizes,
    Done,
    Failed,
}

impl Stage {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Preparing => Some(Self::FetchingBuildpack),
            Self::FetchingBuildpack => Some(Self::Detecting),
            Self::Detecting => Some(Self::Compiling),
            Self::Compiling => Some(Self::Pruning),
            Self::Pruning => Some(Self::ExtractingProcessTypes),
            Self::ExtractingProcessTypes => Some(Self::Archiving),
            Self::Archiving => Some(Self::MeasuringSizes),
            Self::MeasuringSizes => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Error kind reported when this stage fails. `bin/release` failures
    /// during process type extraction override this with `Compile`.
    pub fn failure_kind(self) -> ErrorKind {
        match self {
            Self::FetchingBuildpack => ErrorKind::Fetch,
            Self::Detecting => ErrorKind::Detect,
            Self::Compiling => ErrorKind::Compile,
            Self::Preparing
            | Self::Pruning
            | Self::ExtractingProcessTypes
            | Self::Archiving
            | Self::MeasuringSizes
            | Self::Done
            | Self::Failed => ErrorKind::Archive,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Preparing => "preparing",
            Self::FetchingBuildpack => "fetch_buildpack",
            Self::Detecting => "detect",
            Self::Compiling => "compile",
            Self::Pruning => "prune",
            Self::ExtractingProcessTypes => "process_types",
            Self::Archiving => "archive",
            Self::MeasuringSizes => "check_sizes",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid stage transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: Stage,
    pub to: Stage,
}

pub fn validate_transition(from: Stage, to: Stage) -> Result<(), InvalidTransition> {
    let valid = from.next() == Some(to) || (to == Stage::Failed && !from.is_terminal());
    if valid {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}

/// Current position of one pipeline run.
#[derive(Debug)]
pub struct StageTracker {
    current: Stage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: Stage::Preparing,
        }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    pub fn advance(&mut self, to: Stage) -> Result<(), InvalidTransition> {
        validate_transition(self.current, to)?;
        tracing::trace!("stage {} -> {to}", self.current);
        self.current = to;
        Ok(())
    }
}
