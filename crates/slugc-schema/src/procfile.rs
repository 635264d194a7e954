use crate::SchemaError;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

/// Ordered mapping from process-type name to shell command.
///
/// Insertion order is preserved and the first entry for a name wins, so the
/// mapping reads back in the order the application declared it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessTypes {
    entries: Vec<(String, String)>,
}

impl ProcessTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a process type unless the name is already present.
    /// Returns `false` when an earlier entry kept the name.
    pub fn insert(&mut self, name: impl Into<String>, command: impl Into<String>) -> bool {
        let name = name.into();
        if self.get(&name).is_some() {
            return false;
        }
        self.entries.push((name, command.into()));
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), c.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ProcessTypes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut types = Self::new();
        for (name, command) in iter {
            types.insert(name, command);
        }
        types
    }
}

impl Serialize for ProcessTypes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, command) in &self.entries {
            map.serialize_entry(name, command)?;
        }
        map.end()
    }
}

/// Process-type names are restricted to `[A-Za-z0-9_]+`.
pub fn is_valid_process_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// `name[:] command`. Only ASCII blanks separate the two.
static PROCFILE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_]+):?[ \t\f\r]+(.*)$").expect("Invalid Procfile line regex")
});

fn parse_line(line: &str) -> Option<(&str, &str)> {
    let caps = PROCFILE_LINE.captures(line)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

pub fn parse_procfile_str(input: &str) -> ProcessTypes {
    let mut types = ProcessTypes::new();
    for line in input.lines() {
        if let Some((name, command)) = parse_line(line) {
            if !types.insert(name, command) {
                tracing::debug!(name, "ignoring duplicate Procfile entry");
            }
        }
    }
    types
}

/// Parse a Procfile from disk. A missing file yields `None`.
pub fn parse_procfile_file(path: &Path) -> Result<Option<ProcessTypes>, SchemaError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|e| SchemaError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(parse_procfile_str(&content)))
}
