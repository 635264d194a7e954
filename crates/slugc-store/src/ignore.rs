use crate::StoreError;

use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct IgnorePattern {
    glob: String,
    /// Written with a `/` anywhere, trailing included: matched relative to
    /// the root only.
    anchored: bool,
    /// Written with a trailing `/`: matches directories only.
    dir_only: bool,
}

/// A parsed `.slugignore` file.
///
/// Resolution never touches the filesystem beyond reading directory
/// listings; deleting the returned paths is the caller's job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreFilter {
    patterns: Vec<IgnorePattern>,
}

impl IgnoreFilter {
    pub fn parse(content: &str) -> Self {
        let patterns = content.lines().filter_map(parse_line).collect();
        Self { patterns }
    }

    /// Load an ignore file. A missing file yields `None`.
    pub fn from_file(path: &Path) -> Result<Option<Self>, StoreError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(Self::parse(&content))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.glob.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Expand every pattern under `root` and return the matching paths,
    /// sorted and deduplicated.
    ///
    /// Patterns without a `/` match at any depth. Every result lies strictly
    /// inside `root`; matches that escape it (via `..` or a symlinked parent
    /// directory) are dropped.
    pub fn resolve(&self, root: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let root = fs::canonicalize(root)?;
        let base = Pattern::escape(&root.to_string_lossy());
        let mut found = BTreeSet::new();

        for pattern in &self.patterns {
            let mut globs = vec![format!("{base}/{}", pattern.glob)];
            if !pattern.anchored {
                globs.push(format!("{base}/**/{}", pattern.glob));
            }
            for expr in globs {
                let paths = match glob::glob_with(&expr, MATCH_OPTIONS) {
                    Ok(paths) => paths,
                    Err(e) => {
                        warn!("ignoring invalid .slugignore pattern '{}': {e}", pattern.glob);
                        break;
                    }
                };
                for entry in paths {
                    let path = match entry {
                        Ok(path) => path,
                        Err(e) => {
                            debug!("skipping unreadable path during glob: {e}");
                            continue;
                        }
                    };
                    if pattern.dir_only && !is_real_dir(&path) {
                        continue;
                    }
                    match contained(&root, &path) {
                        Some(path) => {
                            found.insert(path);
                        }
                        None => debug!(
                            "pattern '{}' matched {} outside the build tree, dropping",
                            pattern.glob,
                            path.display()
                        ),
                    }
                }
            }
        }
        Ok(found.into_iter().collect())
    }
}

/// Resolve the ignore file at `ignore_file` against `root`. A missing file
/// resolves to nothing.
pub fn resolve(ignore_file: &Path, root: &Path) -> Result<Vec<PathBuf>, StoreError> {
    match IgnoreFilter::from_file(ignore_file)? {
        Some(filter) => filter.resolve(root),
        None => Ok(Vec::new()),
    }
}

fn parse_line(line: &str) -> Option<IgnorePattern> {
    let line = strip_comment(line);
    let raw = line.trim();
    let glob = raw.trim_matches('/');
    if glob.is_empty() {
        return None;
    }
    Some(IgnorePattern {
        anchored: raw.contains('/'),
        glob: glob.to_owned(),
        dir_only: raw.ends_with('/'),
    })
}

/// Drop everything from the first unescaped `#`. `\#` is a literal `#`.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'#') => {
                out.push('#');
                chars.next();
            }
            '#' => break,
            other => out.push(other),
        }
    }
    out
}

fn is_real_dir(path: &Path) -> bool {
    path.symlink_metadata().is_ok_and(|m| m.is_dir())
}

fn contained(root: &Path, path: &Path) -> Option<PathBuf> {
    let normal = normalize(path);
    if normal == root || !normal.starts_with(root) {
        return None;
    }
    let parent = fs::canonicalize(normal.parent()?).ok()?;
    parent.starts_with(root).then_some(normal)
}

/// Lexically resolve `.` and `..` without consulting the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, rel).unwrap();
    }

    fn rel(root: &Path, paths: &[PathBuf]) -> Vec<String> {
        let root = fs::canonicalize(root).unwrap();
        paths
            .iter()
            .map(|p| p.strip_prefix(&root).unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn parse_strips_comments_and_blanks() {
        let filter = IgnoreFilter::parse("# header\n\n*.log  # logs\n   \nvendor/cache\n");
        let patterns: Vec<&str> = filter.patterns().collect();
        assert_eq!(patterns, vec!["*.log", "vendor/cache"]);
    }

    #[test]
    fn escaped_hash_is_literal() {
        let filter = IgnoreFilter::parse("\\#notes.txt\n");
        let patterns: Vec<&str> = filter.patterns().collect();
        assert_eq!(patterns, vec!["#notes.txt"]);
    }

    #[test]
    fn log_and_tmp_patterns() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.log");
        touch(dir.path(), "tmp/x");
        touch(dir.path(), "keep.txt");

        let filter = IgnoreFilter::parse("*.log\ntmp/\n");
        let paths = filter.resolve(dir.path()).unwrap();
        assert_eq!(rel(dir.path(), &paths), vec!["a.log", "tmp"]);
        assert!(paths.iter().all(|p| !p.ends_with("keep.txt")));
        assert!(paths
            .iter()
            .any(|p| p.join("x") == fs::canonicalize(dir.path().join("tmp/x")).unwrap()));
    }

    #[test]
    fn unanchored_pattern_matches_at_every_depth() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "main.o");
        touch(dir.path(), "src/util.o");
        touch(dir.path(), "src/deep/nested/x.o");
        touch(dir.path(), "src/util.c");

        let paths = IgnoreFilter::parse("*.o").resolve(dir.path()).unwrap();
        assert_eq!(
            rel(dir.path(), &paths),
            vec!["main.o", "src/deep/nested/x.o", "src/util.o"]
        );
    }

    #[test]
    fn anchored_pattern_matches_only_from_root() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "docs/a.md");
        touch(dir.path(), "lib/docs/b.md");

        let paths = IgnoreFilter::parse("docs/*.md").resolve(dir.path()).unwrap();
        assert_eq!(rel(dir.path(), &paths), vec!["docs/a.md"]);

        let paths = IgnoreFilter::parse("/docs").resolve(dir.path()).unwrap();
        assert_eq!(rel(dir.path(), &paths), vec!["docs"]);
    }

    #[test]
    fn dir_only_pattern_skips_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "cache");
        touch(dir.path(), "sub/cache/blob");

        let paths = IgnoreFilter::parse("cache/").resolve(dir.path()).unwrap();
        assert!(paths.is_empty(), "{paths:?}");
    }

    #[test]
    fn trailing_slash_anchors_to_root() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "tmp/x");
        touch(dir.path(), "lib/tmp/keep.rb");

        let paths = IgnoreFilter::parse("tmp/").resolve(dir.path()).unwrap();
        assert_eq!(rel(dir.path(), &paths), vec!["tmp"]);
    }

    #[test]
    fn never_escapes_root() {
        let outer = tempfile::tempdir().unwrap();
        touch(outer.path(), "secret.txt");
        touch(outer.path(), "app/keep.txt");
        let root = outer.path().join("app");

        let filter =
            IgnoreFilter::parse("../secret.txt\n../../etc/passwd\n/../secret.txt\n..\n../*\n");
        let paths = filter.resolve(&root).unwrap();
        assert!(paths.is_empty(), "escaped root: {paths:?}");
    }

    #[test]
    fn symlinked_parent_outside_root_is_dropped() {
        let outer = tempfile::tempdir().unwrap();
        touch(outer.path(), "elsewhere/data.bin");
        let root = outer.path().join("app");
        fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(outer.path().join("elsewhere"), root.join("link")).unwrap();

        let paths = IgnoreFilter::parse("link/*.bin").resolve(&root).unwrap();
        assert!(paths.is_empty());

        // The link itself lives inside the root and may be removed.
        let paths = IgnoreFilter::parse("link").resolve(&root).unwrap();
        assert_eq!(rel(&root, &paths), vec!["link"]);
    }

    #[test]
    fn resolution_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.log");
        touch(dir.path(), "nested/b.log");
        let filter = IgnoreFilter::parse("*.log\nnested\n");
        let first = filter.resolve(dir.path()).unwrap();
        let second = filter.resolve(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(dir.path().join("a.log").exists());
    }

    #[test]
    fn missing_file_resolves_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = resolve(&dir.path().join(".slugignore"), dir.path()).unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn hidden_files_need_explicit_dot() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".env.log");
        touch(dir.path(), "app.log");
        let paths = IgnoreFilter::parse("*.log").resolve(dir.path()).unwrap();
        assert_eq!(rel(dir.path(), &paths), vec!["app.log"]);
        let paths = IgnoreFilter::parse(".*.log").resolve(dir.path()).unwrap();
        assert_eq!(rel(dir.path(), &paths), vec![".env.log"]);
    }
}
