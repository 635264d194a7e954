//! Full compiles against throwaway shell buildpacks on the local filesystem.

use flate2::read::GzDecoder;
use slugc_core::{
    BuildRequest, CapturedOutput, Compiler, ErrorKind, Settings, Stage, Tier, PROCESSES_FILE,
    SLUG_FILE,
};
use slugc_runtime::ProcessRunner;
use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

struct Workspace {
    root: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let ws = Self {
            root: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(ws.build()).unwrap();
        fs::create_dir_all(ws.scratch()).unwrap();
        ws
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    fn build(&self) -> PathBuf {
        self.path("build")
    }

    fn scratch(&self) -> PathBuf {
        self.path("scratch")
    }

    fn out(&self) -> PathBuf {
        self.path("out")
    }

    /// Writes a buildpack whose scripts are the given shell bodies. The
    /// files are left non-executable; fetching fixes the modes.
    fn buildpack(&self, scripts: &[(&str, &str)]) -> String {
        let dir = self.path("buildpack");
        fs::create_dir_all(dir.join("bin")).unwrap();
        for (name, body) in scripts {
            let path = dir.join("bin").join(name);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        }
        dir.to_str().unwrap().to_owned()
    }

    fn request(&self, buildpack: &str) -> BuildRequest {
        BuildRequest::new(self.build(), buildpack, self.path("cache"), self.out())
    }

    fn write(&self, rel: &str, body: &[u8]) {
        let path = self.build().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }
}

fn compile(
    ws: &Workspace,
    request: &BuildRequest,
    settings: Settings,
) -> (Result<slugc_core::BuildResult, slugc_core::CompileError>, CapturedOutput) {
    let runner = ProcessRunner;
    let output = CapturedOutput::new();
    let result = Compiler::new(settings, &runner, &output)
        .with_scratch_dir(ws.scratch())
        .run(request);
    (result, output)
}

fn slug_entries(slug: &Path) -> Vec<(String, Vec<u8>)> {
    let mut ar = tar::Archive::new(GzDecoder::new(File::open(slug).unwrap()));
    ar.entries()
        .unwrap()
        .map(|e| {
            let mut e = e.unwrap();
            let path = e.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            e.read_to_end(&mut data).unwrap();
            (path.trim_end_matches('/').to_owned(), data)
        })
        .collect()
}

fn scratch_is_empty(ws: &Workspace) -> bool {
    fs::read_dir(ws.scratch()).unwrap().next().is_none()
}

const NODE_DETECT: &str = "echo Node.js";

#[test]
fn end_to_end_compile() {
    let ws = Workspace::new();
    let bp = ws.buildpack(&[
        ("detect", NODE_DETECT),
        (
            "compile",
            "echo '-----> Installing dependencies'\n\
             mkdir -p \"$1/node_modules\"\n\
             head -c 65536 /dev/zero > \"$1/node_modules/big.bin\"\n\
             cc_out=\"$1/native.o\"; echo obj > \"$cc_out\"\n\
             echo cached > \"$2/cache.txt\"",
        ),
    ]);
    ws.write("index.js", b"console.log('hi')\n");
    ws.write("Procfile", b"web: node index.js\nworker: node jobs.js\n");
    ws.write(".slugignore", b"*.o\n");
    ws.write(".git/HEAD", b"ref: refs/heads/main\n");
    ws.write("tmp/cache.bin", b"junk");

    let (result, output) = compile(&ws, &ws.request(&bp), Settings::default());
    let result = result.unwrap();

    assert_eq!(result.buildpack_name, "Node.js");
    assert_eq!(result.slug, ws.out().join(SLUG_FILE));
    assert_eq!(
        result.process_types.names().collect::<Vec<_>>(),
        vec!["web", "worker"]
    );
    assert!(result.sizes.slug_size > 0);
    assert!(result.sizes.slug_size < result.sizes.raw_size);
    assert!(result.sizes.cache_size.is_some_and(|n| n > 0));

    let entries = slug_entries(&result.slug);
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names.iter().all(|n| *n == "app" || n.starts_with("app/")));
    assert!(names.contains(&"app/index.js"));
    assert!(names.contains(&"app/node_modules/big.bin"));
    assert!(!names.contains(&"app/native.o"));
    assert!(!names.iter().any(|n| n.starts_with("app/.git")));
    assert!(!names.iter().any(|n| n.starts_with("app/tmp")));

    let json = fs::read_to_string(ws.out().join(PROCESSES_FILE)).unwrap();
    assert_eq!(
        json,
        r#"{"web":"node index.js","worker":"node jobs.js"}"#
    );

    let lines = output.lines();
    for expected in [
        "-----> Copying buildpack... done",
        "-----> Node.js app detected",
        "       -----> Installing dependencies",
        "-----> Deleting 1 files matching .slugignore patterns.",
        "-----> Discovering process types",
        "       Procfile declares types -> web, worker",
    ] {
        assert!(
            lines.iter().any(|l| l == expected),
            "missing {expected:?} in:\n{}",
            output.text()
        );
    }
    let size_line = format!("-----> Compiled slug size: {}K", result.sizes.slug_size / 1024);
    assert_eq!(lines.last(), Some(&size_line));
    assert!(scratch_is_empty(&ws));
}

#[test]
fn detect_rejection_stops_before_compile() {
    let ws = Workspace::new();
    let bp = ws.buildpack(&[
        ("detect", "echo 'no package.json' >&2; exit 1"),
        ("compile", "touch \"$1/compiled\""),
    ]);
    let (result, output) = compile(&ws, &ws.request(&bp), Settings::default());
    let err = result.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Detect);
    assert_eq!(err.tier(), Tier::User);
    assert_eq!(err.stage(), Stage::Detecting);
    assert_eq!(err.output(), ["no package.json".to_owned()]);
    assert!(!ws.build().join("compiled").exists());
    assert!(!ws.out().join(SLUG_FILE).exists());
    assert!(output.text().contains("Copying buildpack... done"));
    assert!(scratch_is_empty(&ws));
}

#[test]
fn compile_timeout_reports_bound() {
    let ws = Workspace::new();
    let bp = ws.buildpack(&[
        ("detect", NODE_DETECT),
        ("compile", "echo starting\nsleep 30"),
    ]);
    let settings = Settings {
        compile_timeout: Duration::from_secs(1),
        ..Settings::default()
    };
    let started = Instant::now();
    let (result, output) = compile(&ws, &ws.request(&bp), settings);
    let err = result.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(err.kind(), ErrorKind::Compile);
    assert_eq!(err.to_string(), "timed out; must complete in 1 seconds");
    assert!(output.lines().contains(&"       starting".to_owned()));
    assert!(scratch_is_empty(&ws));
}

#[test]
fn failing_compile_keeps_output_tail() {
    let ws = Workspace::new();
    let bp = ws.buildpack(&[
        ("detect", NODE_DETECT),
        ("compile", "echo 'npm ERR! missing script: build'\nexit 3"),
    ]);
    let (result, _) = compile(&ws, &ws.request(&bp), Settings::default());
    let err = result.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Compile);
    assert_eq!(err.tier(), Tier::User);
    assert!(err.message().starts_with("build failed"), "{}", err.message());
    assert_eq!(err.output(), ["npm ERR! missing script: build".to_owned()]);
}

#[test]
fn release_supplies_defaults_without_procfile() {
    let ws = Workspace::new();
    let bp = ws.buildpack(&[
        ("detect", NODE_DETECT),
        ("compile", "true"),
        (
            "release",
            "cat <<'YAML'\n---\naddons: []\ndefault_process_types:\n  web: npm start\nYAML",
        ),
    ]);
    ws.write("package.json", b"{}");
    let (result, output) = compile(&ws, &ws.request(&bp), Settings::default());
    let result = result.unwrap();

    assert_eq!(result.process_types.get("web"), Some("npm start"));
    assert!(output
        .lines()
        .contains(&"       Default process types for Node.js -> web".to_owned()));
    assert_eq!(
        fs::read_to_string(ws.out().join(PROCESSES_FILE)).unwrap(),
        r#"{"web":"npm start"}"#
    );
}

#[test]
fn no_procfile_and_no_release_yields_empty_types() {
    let ws = Workspace::new();
    let bp = ws.buildpack(&[("detect", NODE_DETECT), ("compile", "true")]);
    let (result, output) = compile(&ws, &ws.request(&bp), Settings::default());
    let result = result.unwrap();

    assert!(result.process_types.is_empty());
    assert!(output.text().contains("-> (none)"));
    assert_eq!(
        fs::read_to_string(ws.out().join(PROCESSES_FILE)).unwrap(),
        "{}"
    );
}

#[test]
fn compile_receives_build_and_cache_dirs() {
    let ws = Workspace::new();
    let bp = ws.buildpack(&[
        ("detect", NODE_DETECT),
        (
            "compile",
            "printf '%s\\n%s\\n' \"$1\" \"$2\" > \"$1/args.txt\"\ncommand -v sh > \"$1/sh.txt\"",
        ),
    ]);
    let request = ws.request(&bp);
    let (result, _) = compile(&ws, &request, Settings::default());
    result.unwrap();

    let args = fs::read_to_string(ws.build().join("args.txt")).unwrap();
    assert_eq!(
        args,
        format!("{}\n{}\n", request.build_dir.display(), request.cache_dir.display())
    );
    let sh = fs::read_to_string(ws.build().join("sh.txt")).unwrap();
    assert!(!sh.trim().is_empty());
}

#[test]
fn unknown_buildpack_directory_is_fetch_failure() {
    let ws = Workspace::new();
    let missing = ws.path("no-such-buildpack");
    let request = ws.request(missing.to_str().unwrap());
    let (result, output) = compile(&ws, &request, Settings::default());
    let err = result.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert_eq!(err.tier(), Tier::Infrastructure);
    assert!(err.message().starts_with("error fetching buildpack"));
    assert!(output.text().ends_with("failed\n"), "{}", output.text());
    assert!(scratch_is_empty(&ws));
}
