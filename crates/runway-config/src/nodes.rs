//! Helpers for pulling typed values out of KDL nodes.

use std::collections::HashMap;

use kdl::KdlNode;

use crate::{ConfigError, ConfigResult};

pub(crate) fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// First positional argument, which must be a string.
pub(crate) fn required_string_arg(node: &KdlNode, field: &str) -> ConfigResult<String> {
    let has_arg = node.entries().iter().any(|e| e.name().is_none());
    match first_string_arg(node) {
        Some(value) => Ok(value),
        None if has_arg => Err(ConfigError::invalid(field, "expected a string")),
        None => Err(ConfigError::MissingField(field.to_string())),
    }
}

/// First positional argument, which must be a non-negative integer.
pub(crate) fn required_u64_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let entry = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
    let value = entry
        .value()
        .as_integer()
        .ok_or_else(|| ConfigError::invalid(field, "expected an integer"))?;
    u64::try_from(value).map_err(|_| ConfigError::invalid(field, format!("{} is out of range", value)))
}

/// Children of a block node as `name "value"` pairs.
pub(crate) fn string_children(node: &KdlNode, field: &str) -> ConfigResult<HashMap<String, String>> {
    let mut values = HashMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            let value = required_string_arg(child, &format!("{}.{}", field, key))?;
            values.insert(key, value);
        }
    }
    Ok(values)
}
