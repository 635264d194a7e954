use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Where a buildpack comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildpackSource {
    /// `http(s)://…/name.tgz` or `.tar.gz`, query string allowed.
    Tarball { url: String },
    /// An existing directory on the local filesystem.
    Directory { path: PathBuf },
    /// Anything else: a git URL with an optional `#ref`.
    Git {
        url: String,
        reference: Option<String>,
    },
}

impl BuildpackSource {
    /// Classify a buildpack address. Tarball URLs win over directories, and
    /// directories over git.
    pub fn parse(raw: &str) -> Self {
        if is_tarball_url(raw) {
            return Self::Tarball {
                url: raw.to_owned(),
            };
        }
        let path = Path::new(raw);
        if !raw.is_empty() && path.is_dir() {
            return Self::Directory {
                path: path.to_path_buf(),
            };
        }
        let (url, reference) = match raw.split_once('#') {
            Some((url, r)) => (url, Some(r).filter(|r| !r.is_empty())),
            None => (raw, None),
        };
        Self::Git {
            url: url.to_owned(),
            reference: reference.map(str::to_owned),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tarball { .. } => "tarball",
            Self::Directory { .. } => "directory",
            Self::Git { .. } => "git",
        }
    }
}

impl fmt::Display for BuildpackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tarball { url } => write!(f, "{url}"),
            Self::Directory { path } => write!(f, "{}", path.display()),
            Self::Git {
                url,
                reference: Some(r),
            } => write!(f, "{url}#{r}"),
            Self::Git { url, .. } => write!(f, "{url}"),
        }
    }
}

static TARBALL_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://.*\.(tgz|tar\.gz)($|\?)").expect("Invalid tarball URL regex")
});

pub fn is_tarball_url(raw: &str) -> bool {
    TARBALL_URL.is_match(raw)
}
