use crate::procfile::{is_valid_process_name, ProcessTypes};
use crate::SchemaError;
use serde_yaml::Value;
use tracing::warn;

const PROCESS_TYPES_KEY: &str = "default_process_types";

/// Extract `default_process_types` from the YAML document printed by a
/// buildpack's `bin/release`.
///
/// Empty output, a non-mapping document, or a missing key all yield an empty
/// mapping. Entries whose name is invalid or whose command is not a scalar
/// are skipped.
pub fn parse_release_str(input: &str) -> Result<ProcessTypes, SchemaError> {
    let mut types = ProcessTypes::new();
    if input.trim().is_empty() {
        return Ok(types);
    }

    let doc: Value = serde_yaml::from_str(input)?;
    let Some(section) = doc.get(PROCESS_TYPES_KEY) else {
        return Ok(types);
    };
    let Some(mapping) = section.as_mapping() else {
        if !section.is_null() {
            warn!("release output: {PROCESS_TYPES_KEY} is not a mapping, ignoring");
        }
        return Ok(types);
    };

    for (key, value) in mapping {
        let Some(name) = key.as_str() else {
            warn!("release output: skipping non-string process type name");
            continue;
        };
        if !is_valid_process_name(name) {
            warn!("release output: skipping invalid process type name '{name}'");
            continue;
        }
        let command = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => {
                warn!("release output: skipping process type '{name}' with non-scalar command");
                continue;
            }
        };
        types.insert(name, command);
    }
    Ok(types)
}
