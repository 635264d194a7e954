use crate::output::BuildOutput;
use crate::settings::{compile_env, Settings};
use crate::stage::{Stage, StageTracker};
use crate::timing::timed;
use crate::{CompileError, ErrorKind};

use serde::Serialize;
use slugc_remote::{BuildpackFetcher, RetryPolicy};
use slugc_runtime::{CommandRunner, CommandSpec, RunOutput, RuntimeError};
use slugc_schema::{
    parse_procfile_file, parse_release_str, BuildpackConfig, BuildpackSource, ProcessTypes,
};
use slugc_store::{disk_usage, pack_slug, prune_build_dir};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, info_span, warn};

pub const SLUG_FILE: &str = "slug.tgz";
pub const PROCESSES_FILE: &str = "processes.json";

const PROCFILE: &str = "Procfile";
const BUILDPACK_DIR_PREFIX: &str = "buildpack_";
/// Lines of script output attached to a failure.
const OUTPUT_TAIL: usize = 20;
/// Leads a failure tail whose capture dropped earlier lines.
const TRUNCATED_NOTE: &str = "(earlier output truncated)";

/// Inputs for one compile. `build_dir` is modified in place.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub build_dir: PathBuf,
    pub buildpack: String,
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl BuildRequest {
    pub fn new(
        build_dir: impl Into<PathBuf>,
        buildpack: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            build_dir: build_dir.into(),
            buildpack: buildpack.into(),
            cache_dir: cache_dir.into(),
            output_dir: output_dir.into(),
        }
    }
}

/// Sizes in bytes. `raw_size` and `cache_size` are allocated disk usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlugSizes {
    pub raw_size: u64,
    pub cache_size: Option<u64>,
    pub slug_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub slug: PathBuf,
    pub process_types: ProcessTypes,
    pub sizes: SlugSizes,
    #[serde(skip)]
    pub buildpack_name: String,
    #[serde(skip)]
    pub compile_id: String,
}

/// Runs the compile pipeline: fetch, detect, compile, prune, discover
/// process types, archive, measure.
///
/// Stages run strictly in sequence and the first failure aborts the rest.
/// The fetched buildpack lives in a temporary directory that is removed
/// whatever the outcome.
pub struct Compiler<'a> {
    settings: Settings,
    runner: &'a dyn CommandRunner,
    output: &'a dyn BuildOutput,
    retry: RetryPolicy,
    scratch_dir: Option<PathBuf>,
}

impl<'a> Compiler<'a> {
    pub fn new(
        settings: Settings,
        runner: &'a dyn CommandRunner,
        output: &'a dyn BuildOutput,
    ) -> Self {
        Self {
            settings,
            runner,
            output,
            retry: RetryPolicy::default(),
            scratch_dir: None,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create buildpack directories under `dir` instead of the system
    /// temp directory.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn run(&self, request: &BuildRequest) -> Result<BuildResult, CompileError> {
        let compile_id = compile_id();
        let span = info_span!(
            "compile",
            compile_id = %compile_id,
            log_token = self.settings.log_token.as_deref()
        );
        let _guard = span.enter();
        info!(
            "compiling {} into {}",
            request.build_dir.display(),
            request.output_dir.display()
        );

        let mut stages = StageTracker::new();
        let result = self.run_stages(request, &mut stages, &compile_id);
        match &result {
            Ok(r) => info!(
                process_types = r.process_types.len(),
                slug_size = r.sizes.slug_size,
                "compile finished"
            ),
            Err(e) => {
                if let Err(t) = stages.advance(Stage::Failed) {
                    debug!("{t}");
                }
                warn!(
                    kind = %e.kind(),
                    stage = %e.stage(),
                    "compile failed: {e}"
                );
            }
        }
        result
    }

    fn run_stages(
        &self,
        request: &BuildRequest,
        stages: &mut StageTracker,
        compile_id: &str,
    ) -> Result<BuildResult, CompileError> {
        timed("preflight", || preflight(request))?;
        let workspace = self.buildpack_workspace()?;
        let result = self.run_with_buildpack(request, workspace.path(), stages, compile_id);

        let path = workspace.path().to_path_buf();
        match workspace.close() {
            Ok(()) => debug!("removed buildpack directory {}", path.display()),
            Err(e) => warn!("failed to remove buildpack directory {}: {e}", path.display()),
        }
        result
    }

    fn buildpack_workspace(&self) -> Result<tempfile::TempDir, CompileError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(BUILDPACK_DIR_PREFIX);
        let dir = match &self.scratch_dir {
            Some(scratch) => builder.tempdir_in(scratch),
            None => builder.tempdir(),
        };
        dir.map_err(|e| {
            CompileError::new(
                ErrorKind::Fetch,
                Stage::Preparing,
                "could not create buildpack directory",
            )
            .with_source(e)
        })
    }

    fn run_with_buildpack(
        &self,
        request: &BuildRequest,
        buildpack: &Path,
        stages: &mut StageTracker,
        compile_id: &str,
    ) -> Result<BuildResult, CompileError> {
        enter(stages, Stage::FetchingBuildpack)?;
        let config = BuildpackConfig::from_source(&request.buildpack);
        timed("fetch_buildpack", || self.fetch(&request.buildpack, buildpack))?;

        enter(stages, Stage::Detecting)?;
        let name = timed("detect", || self.detect(buildpack, &request.build_dir))?;

        enter(stages, Stage::Compiling)?;
        timed("compile", || self.compile(buildpack, request, &config))?;

        enter(stages, Stage::Pruning)?;
        timed("prune", || self.prune(&request.build_dir))?;

        enter(stages, Stage::ExtractingProcessTypes)?;
        let process_types = timed("process_types", || {
            self.process_types(buildpack, request, &name)
        })?;

        enter(stages, Stage::Archiving)?;
        let slug = request.output_dir.join(SLUG_FILE);
        let slug_size = timed("create_tar_slug", || {
            pack_slug(&request.build_dir, &slug).map_err(|e| {
                CompileError::new(ErrorKind::Archive, Stage::Archiving, "could not archive slug")
                    .with_source(e)
            })
        })?;

        enter(stages, Stage::MeasuringSizes)?;
        let sizes = timed("check_sizes", || self.measure(request, slug_size))?;

        enter(stages, Stage::Done)?;
        Ok(BuildResult {
            slug,
            process_types,
            sizes,
            buildpack_name: name,
            compile_id: compile_id.to_owned(),
        })
    }

    fn fetch(&self, raw: &str, dest: &Path) -> Result<(), CompileError> {
        let source = BuildpackSource::parse(raw);
        let fetcher = BuildpackFetcher::new(self.runner).with_retry(self.retry);
        let begin: &dyn Fn(&str) = &|label| self.output.begin(label);
        match fetcher.fetch(&source, dest, self.settings.fetch_timeout, begin) {
            Ok(()) => {
                self.output.finish("done");
                Ok(())
            }
            Err(e) => {
                self.output.finish("failed");
                Err(CompileError::new(
                    ErrorKind::Fetch,
                    Stage::FetchingBuildpack,
                    format!("error fetching buildpack: {e}"),
                )
                .with_source(e))
            }
        }
    }

    fn detect(&self, buildpack: &Path, build_dir: &Path) -> Result<String, CompileError> {
        let spec = CommandSpec::new(script(buildpack, "detect")).arg(build_dir);
        let fail = || {
            CompileError::new(
                ErrorKind::Detect,
                Stage::Detecting,
                "no compatible app detected",
            )
        };
        let out = match self.runner.run(&spec, self.settings.detect_timeout, None) {
            Ok(out) => out,
            Err(e) => return Err(fail().with_output(error_output(&e)).with_source(e)),
        };
        if !out.success() {
            debug!("bin/detect exited with {}", describe_status(&out));
            return Err(fail().with_output(tail(&out)));
        }
        let name = out.stdout().trim().to_owned();
        self.output.step(&format!("{name} app detected"));
        Ok(name)
    }

    fn compile(
        &self,
        buildpack: &Path,
        request: &BuildRequest,
        config: &BuildpackConfig,
    ) -> Result<(), CompileError> {
        let mut spec = CommandSpec::new(script(buildpack, "compile"))
            .arg(&request.build_dir)
            .arg(&request.cache_dir);
        for (key, value) in compile_env(config) {
            spec = spec.env(key, value);
        }

        let timeout = self.settings.compile_timeout;
        let sink: &dyn Fn(&str) = &|line| self.output.line(line);
        let fail = |msg: String| CompileError::new(ErrorKind::Compile, Stage::Compiling, msg);
        match self.runner.run(&spec, timeout, Some(sink)) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(fail(format!(
                "build failed: bin/compile exited with {}",
                describe_status(&out)
            ))
            .with_output(tail(&out))),
            Err(e @ RuntimeError::Timeout { .. }) => Err(fail(format!(
                "timed out; must complete in {} seconds",
                timeout.as_secs()
            ))
            .with_output(error_output(&e))
            .with_source(e)),
            Err(e) => Err(fail(format!("could not run bin/compile: {e}")).with_source(e)),
        }
    }

    fn prune(&self, build_dir: &Path) -> Result<(), CompileError> {
        let report = prune_build_dir(build_dir).map_err(|e| {
            CompileError::new(
                ErrorKind::Archive,
                Stage::Pruning,
                format!("could not prune build directory: {e}"),
            )
            .with_source(e)
        })?;
        if let Some(removed) = report.slugignore_removed {
            self.output.step(&format!(
                "Deleting {removed} files matching .slugignore patterns."
            ));
        }
        debug!(junk_removed = report.junk_removed, "pruned build directory");
        Ok(())
    }

    /// Procfile types when the Procfile declares any, otherwise the
    /// buildpack's defaults. Either way the result is written to
    /// `processes.json`.
    fn process_types(
        &self,
        buildpack: &Path,
        request: &BuildRequest,
        name: &str,
    ) -> Result<ProcessTypes, CompileError> {
        self.output.step("Discovering process types");
        let fail = |msg: String| {
            CompileError::new(ErrorKind::Archive, Stage::ExtractingProcessTypes, msg)
        };

        let procfile = parse_procfile_file(&request.build_dir.join(PROCFILE))
            .map_err(|e| fail(format!("could not read Procfile: {e}")).with_source(e))?;
        let types = match procfile {
            Some(types) if !types.is_empty() => {
                self.output
                    .line(&format!("Procfile declares types -> {}", describe(&types)));
                types
            }
            _ => {
                let types = self.release(buildpack, &request.build_dir)?;
                self.output.line(&format!(
                    "Default process types for {name} -> {}",
                    describe(&types)
                ));
                types
            }
        };

        let json = serde_json::to_string(&types)
            .map_err(|e| fail(format!("could not encode process types: {e}")).with_source(e))?;
        let path = request.output_dir.join(PROCESSES_FILE);
        fs::write(&path, json).map_err(|e| {
            fail(format!("could not write {}: {e}", path.display())).with_source(e)
        })?;
        Ok(types)
    }

    fn release(&self, buildpack: &Path, build_dir: &Path) -> Result<ProcessTypes, CompileError> {
        let path = script(buildpack, "release");
        if !path.is_file() {
            debug!("buildpack has no bin/release");
            return Ok(ProcessTypes::new());
        }
        let fail = |msg: String| {
            CompileError::new(ErrorKind::Compile, Stage::ExtractingProcessTypes, msg)
        };
        let spec = CommandSpec::new(path).arg(build_dir);
        let out = match self.runner.run(&spec, self.settings.detect_timeout, None) {
            Ok(out) => out,
            Err(e) => {
                return Err(fail(format!("bin/release failed: {e}"))
                    .with_output(error_output(&e))
                    .with_source(e));
            }
        };
        if !out.success() {
            return Err(fail(format!(
                "bin/release exited with {}",
                describe_status(&out)
            ))
            .with_output(tail(&out)));
        }
        parse_release_str(&out.stdout())
            .map_err(|e| fail(format!("invalid bin/release output: {e}")).with_source(e))
    }

    fn measure(&self, request: &BuildRequest, slug_size: u64) -> Result<SlugSizes, CompileError> {
        let raw_size = disk_usage(&request.build_dir).map_err(|e| {
            CompileError::new(
                ErrorKind::Archive,
                Stage::MeasuringSizes,
                format!("could not measure build directory: {e}"),
            )
            .with_source(e)
        })?;
        let cache_size = if request.cache_dir.exists() {
            match disk_usage(&request.cache_dir) {
                Ok(size) => Some(size),
                Err(e) => {
                    warn!("could not measure cache directory: {e}");
                    None
                }
            }
        } else {
            None
        };

        info!(raw_size, slug_size, cache_size, "check_sizes");
        self.output
            .step(&format!("Compiled slug size: {}K", slug_size / 1024));
        Ok(SlugSizes {
            raw_size,
            cache_size,
            slug_size,
        })
    }
}

fn enter(stages: &mut StageTracker, next: Stage) -> Result<(), CompileError> {
    let current = stages.current();
    stages
        .advance(next)
        .map_err(|e| CompileError::new(current.failure_kind(), current, e.to_string()))
}

fn preflight(request: &BuildRequest) -> Result<(), CompileError> {
    let fail = |msg: String| CompileError::new(ErrorKind::Archive, Stage::Preparing, msg);
    if !request.build_dir.is_dir() {
        return Err(fail(format!(
            "build directory {} does not exist",
            request.build_dir.display()
        )));
    }
    for dir in [&request.cache_dir, &request.output_dir] {
        fs::create_dir_all(dir)
            .map_err(|e| fail(format!("could not create {}: {e}", dir.display())).with_source(e))?;
    }
    Ok(())
}

fn script(buildpack: &Path, name: &str) -> PathBuf {
    buildpack.join("bin").join(name)
}

fn describe(types: &ProcessTypes) -> String {
    if types.is_empty() {
        return "(none)".to_owned();
    }
    types.names().collect::<Vec<_>>().join(", ")
}

fn describe_status(out: &RunOutput) -> String {
    match out.code() {
        Some(code) => format!("status {code}"),
        None => "a signal".to_owned(),
    }
}

fn tail(out: &RunOutput) -> Vec<String> {
    let lines = out.tail(OUTPUT_TAIL);
    let mut tail = Vec::with_capacity(lines.len() + 1);
    if out.truncated && lines.len() == out.lines.len() {
        tail.push(TRUNCATED_NOTE.to_owned());
    }
    tail.extend(lines.into_iter().map(str::to_owned));
    tail
}

fn error_output(e: &RuntimeError) -> Vec<String> {
    match e {
        RuntimeError::Timeout { output, .. } => {
            let lines: Vec<&str> = output.lines().collect();
            let skip = lines.len().saturating_sub(OUTPUT_TAIL);
            lines[skip..].iter().map(|l| (*l).to_owned()).collect()
        }
        _ => Vec::new(),
    }
}

/// Short random-looking identifier correlating the log lines of one run.
fn compile_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&nanos.to_le_bytes());
    hasher.finalize().to_hex().as_str()[..12].to_owned()
}
