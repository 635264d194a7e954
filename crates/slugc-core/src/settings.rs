use slugc_schema::BuildpackConfig;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(900);
pub const DEFAULT_DETECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Variables a buildpack config may never set for `bin/compile`.
pub const RESERVED_ENV: [&str; 12] = [
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "PWD",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "GIT_DIR",
    "BUILDPACK_FETCH_TIMEOUT",
    "COMPILE_TIMEOUT",
    "DETECT_TIMEOUT",
    "LOG_TOKEN",
];

/// Timeouts and log correlation for one compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub fetch_timeout: Duration,
    pub compile_timeout: Duration,
    /// Bound for `bin/detect` and `bin/release`.
    pub detect_timeout: Duration,
    pub log_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
            detect_timeout: DEFAULT_DETECT_TIMEOUT,
            log_token: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup. Unset values take
    /// the default; unparseable or zero values take the default with a
    /// warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |key: &str, default: Duration| match lookup(key) {
            None => default,
            Some(raw) => parse_secs(key, &raw).unwrap_or(default),
        };
        Self {
            fetch_timeout: secs("BUILDPACK_FETCH_TIMEOUT", DEFAULT_FETCH_TIMEOUT),
            compile_timeout: secs("COMPILE_TIMEOUT", DEFAULT_COMPILE_TIMEOUT),
            detect_timeout: secs("DETECT_TIMEOUT", DEFAULT_DETECT_TIMEOUT),
            log_token: lookup("LOG_TOKEN").filter(|t| !t.trim().is_empty()),
        }
    }
}

fn parse_secs(key: &str, raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) => {
            warn!("{key}=0 is not a usable timeout, using the default");
            None
        }
        Ok(n) => Some(Duration::from_secs(n)),
        Err(e) => {
            warn!("invalid {key}='{raw}': {e}, using the default");
            None
        }
    }
}

/// Environment overrides for `bin/compile`, taken from the buildpack config.
///
/// The child still inherits the ambient environment. Keys that are not valid
/// variable names, or that are in [`RESERVED_ENV`], are dropped.
pub fn compile_env(config: &BuildpackConfig) -> Vec<(String, String)> {
    let mut env = Vec::with_capacity(config.len());
    for (key, value) in config.iter() {
        if !is_env_name(key) {
            warn!("dropping buildpack config '{key}': not a valid environment variable name");
            continue;
        }
        if RESERVED_ENV.contains(&key) {
            warn!("dropping buildpack config '{key}': reserved variable");
            continue;
        }
        env.push((key.to_owned(), value.to_owned()));
    }
    env
}

fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let settings = Settings::from_lookup(lookup(&[]));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.compile_timeout, Duration::from_secs(900));
        assert_eq!(settings.fetch_timeout, Duration::from_secs(90));
    }

    #[test]
    fn reads_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("BUILDPACK_FETCH_TIMEOUT", "30"),
            ("COMPILE_TIMEOUT", " 1200 "),
            ("DETECT_TIMEOUT", "5"),
            ("LOG_TOKEN", "t.abc123"),
        ]));
        assert_eq!(settings.fetch_timeout, Duration::from_secs(30));
        assert_eq!(settings.compile_timeout, Duration::from_secs(1200));
        assert_eq!(settings.detect_timeout, Duration::from_secs(5));
        assert_eq!(settings.log_token.as_deref(), Some("t.abc123"));
    }

    #[test]
    fn invalid_or_zero_falls_back() {
        let settings = Settings::from_lookup(lookup(&[
            ("COMPILE_TIMEOUT", "ten minutes"),
            ("BUILDPACK_FETCH_TIMEOUT", "0"),
            ("DETECT_TIMEOUT", "-4"),
            ("LOG_TOKEN", "   "),
        ]));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn compile_env_filters_reserved_and_invalid_keys() {
        let config = BuildpackConfig::from_source(
            "https://x/bp.tgz?NODE_ENV=production&PATH=/evil&2bad=x&a-b=c&_ok=1&LD_PRELOAD=/x.so",
        );
        assert_eq!(
            compile_env(&config),
            vec![
                ("NODE_ENV".to_owned(), "production".to_owned()),
                ("_ok".to_owned(), "1".to_owned()),
            ]
        );
    }

    #[test]
    fn env_names() {
        assert!(is_env_name("A"));
        assert!(is_env_name("_A1"));
        assert!(!is_env_name(""));
        assert!(!is_env_name("1A"));
        assert!(!is_env_name("A=B"));
        assert!(!is_env_name("A B"));
    }
}
