/// Key/value pairs taken from the query component of a buildpack address.
///
/// Keys keep their first-seen position; a repeated key overwrites the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildpackConfig {
    vars: Vec<(String, String)>,
}

impl BuildpackConfig {
    /// Parse the `?k=v&…` part of `raw`, stopping at any `#` fragment.
    /// Values are percent-decoded; a missing `=` yields an empty value.
    pub fn from_source(raw: &str) -> Self {
        let mut config = Self::default();
        let Some((_, after)) = raw.split_once('?') else {
            return config;
        };
        let query = after.split_once('#').map_or(after, |(q, _)| q);
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            config.set(key, &percent_decode(value));
        }
        config
    }

    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(slot) = self.vars.iter_mut().find(|(k, _)| k == key) {
            value.clone_into(&mut slot.1);
        } else {
            self.vars.push((key.to_owned(), value.to_owned()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Decode `%XX` escapes. Malformed escapes are kept verbatim and `+` is not
/// treated as a space.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_pairs_in_order() {
        let config = BuildpackConfig::from_source("https://example.com/bp.tgz?b=2&a=1");
        let pairs: Vec<(&str, &str)> = config.iter().collect();
        assert_eq!(pairs, vec![("b", "2"), ("a", "1")]);
    }

    #[test]
    fn no_query_yields_empty_config() {
        assert!(BuildpackConfig::from_source("https://example.com/bp.tgz").is_empty());
        assert!(BuildpackConfig::from_source("/srv/buildpacks/ruby").is_empty());
    }

    #[test]
    fn decodes_percent_escapes() {
        let config =
            BuildpackConfig::from_source("https://example.com/bp.tgz?path=%2Fusr%2Flocal&msg=a%20b+c");
        assert_eq!(config.get("path"), Some("/usr/local"));
        assert_eq!(config.get("msg"), Some("a b+c"));
    }

    #[test]
    fn keeps_malformed_escapes() {
        let config = BuildpackConfig::from_source("https://x/bp.tgz?a=100%&b=%zz&c=%4");
        assert_eq!(config.get("a"), Some("100%"));
        assert_eq!(config.get("b"), Some("%zz"));
        assert_eq!(config.get("c"), Some("%4"));
    }

    #[test]
    fn skips_empty_pairs_and_defaults_missing_values() {
        let config = BuildpackConfig::from_source("https://x/bp.tgz?&flag&&k=v");
        assert_eq!(config.len(), 2);
        assert_eq!(config.get("flag"), Some(""));
        assert_eq!(config.get("k"), Some("v"));
    }

    #[test]
    fn repeated_key_overwrites_in_place() {
        let config = BuildpackConfig::from_source("https://x/bp.tgz?a=1&b=2&a=3");
        let pairs: Vec<(&str, &str)> = config.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn stops_at_fragment() {
        let config = BuildpackConfig::from_source("https://github.com/org/bp.git?stack=22#v3");
        assert_eq!(config.len(), 1);
        assert_eq!(config.get("stack"), Some("22"));
    }

    #[test]
    fn value_may_contain_equals() {
        let config = BuildpackConfig::from_source("https://x/bp.tgz?opts=a=b");
        assert_eq!(config.get("opts"), Some("a=b"));
    }
}
